//! Challenge page rendering.

use std::fs;
use std::path::Path;

use bouncer_core::CaptchaProvider;

use crate::error::ChallengeError;

/// Built-in challenge page.
const CHALLENGE_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Verification required</title>
    <script src="{{SCRIPT_URL}}" async defer></script>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #f4f5f7;
            color: #1f2933;
        }
        .container {
            text-align: center;
            padding: 2rem;
            max-width: 500px;
            background: white;
            border-radius: 8px;
        }
        h1 {
            margin: 0 0 1rem 0;
            font-size: 1.5rem;
        }
        form {
            display: flex;
            flex-direction: column;
            align-items: center;
            gap: 1rem;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Checking your browser</h1>
        <p>Please complete the challenge below to continue.</p>
        <form method="POST" action="">
            <div class="{{WIDGET_CLASS}}" data-sitekey="{{SITE_KEY}}"></div>
            <button type="submit">Continue</button>
        </form>
    </div>
</body>
</html>"#;

/// Challenge page template with `{{SCRIPT_URL}}`, `{{WIDGET_CLASS}}` and
/// `{{SITE_KEY}}` placeholders.
#[derive(Debug, Clone)]
pub struct ChallengeTemplate {
    source: String,
}

impl Default for ChallengeTemplate {
    fn default() -> Self {
        Self {
            source: CHALLENGE_PAGE_HTML.to_string(),
        }
    }
}

impl ChallengeTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Loads a custom template.
    pub fn from_file(path: &Path) -> Result<Self, ChallengeError> {
        let source = fs::read_to_string(path).map_err(|source| ChallengeError::Template {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(source))
    }

    /// Renders the page for `provider` with the public `site_key`.
    pub fn render(&self, provider: CaptchaProvider, site_key: &str) -> String {
        self.source
            .replace("{{SCRIPT_URL}}", provider.script_url())
            .replace("{{WIDGET_CLASS}}", provider.widget_class())
            .replace("{{SITE_KEY}}", site_key)
    }
}
