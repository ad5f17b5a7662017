//! HTML asset-reference rewriting.
//!
//! Rewrites `href="…"` and `src="…"` attribute values to their versioned
//! equivalents when the URL carries a versionable extension and resolves in
//! the version index. External URLs, fragments, query-carrying URLs, and
//! unregistered local paths pass through untouched. The transform is
//! idempotent: a versioned URL never appears as a logical key, so a second
//! pass changes nothing.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use super::VersionIndex;

const SOURCE: &str = "version::rewrite";

static ASSET_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(href|src)="([^"]+\.(?:css|js|mjs|png|jpg|jpeg|gif|svg|webp|ico|woff|woff2|ttf|otf|eot))""#,
    )
    .expect("asset reference pattern is valid")
});

pub struct HtmlRewriter {
    index: Arc<VersionIndex>,
}

impl HtmlRewriter {
    pub fn new(index: Arc<VersionIndex>) -> Self {
        Self { index }
    }

    /// Rewrite asset references in an HTML buffer.
    ///
    /// Returns the input unchanged (same bytes) when nothing matched; the
    /// caller derives the ETag from whatever comes back.
    pub fn rewrite(&self, content: &[u8], base_path: &str) -> Vec<u8> {
        if !self.index.enabled() {
            return content.to_vec();
        }

        let html = String::from_utf8_lossy(content);
        let mut replacements = 0usize;

        let rewritten = ASSET_REFERENCE.replace_all(&html, |caps: &regex::Captures<'_>| {
            let attribute = &caps[1];
            let url = &caps[2];
            match self.index.versioned(url) {
                Some(versioned) => {
                    replacements += 1;
                    format!("{attribute}=\"{versioned}\"")
                }
                None => caps[0].to_string(),
            }
        });

        if replacements == 0 {
            return content.to_vec();
        }

        debug!(
            target_module = SOURCE,
            base_path, replacements, "rewrote asset references"
        );
        rewritten.into_owned().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::VersioningSettings;

    use super::*;

    fn rewriter_with(paths: &[(&str, &[u8])]) -> HtmlRewriter {
        let index = Arc::new(VersionIndex::new(VersioningSettings {
            enable: true,
            hash_length: 8,
            ..Default::default()
        }));
        for (path, content) in paths {
            index.register(path, content);
        }
        HtmlRewriter::new(index)
    }

    #[test]
    fn rewrites_registered_script_and_stylesheet_references() {
        let rewriter = rewriter_with(&[
            ("/static/app.js", b"console.log('hi');"),
            ("/static/site.css", b"body{}"),
        ]);
        let html = br#"<link href="/static/site.css"><script src="/static/app.js"></script>"#;

        let output = rewriter.rewrite(html, "/index.html");
        let output = String::from_utf8(output).unwrap();

        assert!(!output.contains(r#"src="/static/app.js""#));
        assert!(!output.contains(r#"href="/static/site.css""#));
        assert!(output.contains(r#"src="/static/app."#));
        assert!(output.contains(r#"href="/static/site."#));
    }

    #[test]
    fn leaves_unregistered_and_external_urls_alone() {
        let rewriter = rewriter_with(&[("/static/app.js", b"body")]);
        let html = br#"<script src="https://cdn.example.com/lib.js"></script><img src="/images/photo.png">"#;

        let output = rewriter.rewrite(html, "/index.html");
        assert_eq!(output, html.to_vec());
    }

    #[test]
    fn leaves_query_carrying_urls_alone() {
        let rewriter = rewriter_with(&[("/static/app.js", b"body")]);
        let html = br#"<script src="/static/app.js?v=3"></script>"#;

        let output = rewriter.rewrite(html, "/index.html");
        assert_eq!(output, html.to_vec());
    }

    #[test]
    fn rewriting_is_idempotent() {
        let rewriter = rewriter_with(&[("/static/app.js", b"console.log('hi');")]);
        let html = br#"<script src="/static/app.js"></script>"#;

        let once = rewriter.rewrite(html, "/index.html");
        let twice = rewriter.rewrite(&once, "/index.html");
        assert_eq!(once, twice);
    }

    #[test]
    fn disabled_index_passes_content_through() {
        let index = Arc::new(VersionIndex::new(VersioningSettings {
            enable: false,
            ..Default::default()
        }));
        let rewriter = HtmlRewriter::new(index);
        let html = br#"<script src="/static/app.js"></script>"#;
        assert_eq!(rewriter.rewrite(html, "/index.html"), html.to_vec());
    }
}
