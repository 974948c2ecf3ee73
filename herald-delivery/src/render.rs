//! Turns an update into the HTML body shared by every email of a run.

use herald_common::{RenderedContent, Update, Workspace};

use crate::RenderError;

const WORKSPACE: &str = "{{workspace}}";
const TITLE: &str = "{{title}}";
const CONTENT: &str = "{{content}}";

pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{title}}</title>
</head>
<body style="font-family: -apple-system, Helvetica, Arial, sans-serif; max-width: 640px; margin: 0 auto;">
<p style="color: #6b7280; font-size: 14px;">{{workspace}}</p>
<h1>{{title}}</h1>
{{content}}
</body>
</html>
"#;

pub trait ContentRenderer: Send + Sync + std::fmt::Debug {
    /// The HTML body for `update`.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] if the update cannot be rendered.
    fn render(&self, update: &Update, workspace: &Workspace) -> Result<String, RenderError>;

    fn subject(&self, update: &Update, workspace: &Workspace) -> String {
        format!("{}: {}", workspace.name, update.title)
    }

    /// Subject and body together, ready to be shared between jobs.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::EmptyTitle`] for an update without a title, or
    /// whatever [`ContentRenderer::render`] fails with.
    fn render_content(
        &self,
        update: &Update,
        workspace: &Workspace,
    ) -> Result<RenderedContent, RenderError> {
        if update.title.trim().is_empty() {
            return Err(RenderError::EmptyTitle);
        }

        let html = self.render(update, workspace)?;
        Ok(RenderedContent::new(self.subject(update, workspace), html))
    }
}

/// Placeholder substitution over an HTML template.
///
/// `{{workspace}}` and `{{title}}` are escaped, `{{content}}` is inserted
/// verbatim since it is already HTML.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    template: String,
}

impl TemplateRenderer {
    /// # Errors
    ///
    /// Returns [`RenderError::MissingPlaceholder`] if the template has no
    /// `{{content}}` placeholder.
    pub fn new(template: impl Into<String>) -> Result<Self, RenderError> {
        let template = template.into();

        if !template.contains(CONTENT) {
            return Err(RenderError::MissingPlaceholder(CONTENT));
        }

        Ok(Self { template })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl ContentRenderer for TemplateRenderer {
    fn render(&self, update: &Update, workspace: &Workspace) -> Result<String, RenderError> {
        // Content last, so placeholders inside the document survive untouched
        Ok(self
            .template
            .replace(WORKSPACE, &escape_html(&workspace.name))
            .replace(TITLE, &escape_html(&update.title))
            .replace(CONTENT, &update.content))
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }

    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use herald_common::{UpdateId, WorkspaceId};

    use super::*;

    fn update(title: &str, content: &str) -> Update {
        Update {
            id: UpdateId(1),
            workspace_id: WorkspaceId(7),
            title: title.to_string(),
            content: content.to_string(),
        }
    }

    fn workspace(name: &str) -> Workspace {
        Workspace {
            id: WorkspaceId(7),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_template_without_content_is_rejected() {
        assert_eq!(
            TemplateRenderer::new("<h1>{{title}}</h1>").unwrap_err(),
            RenderError::MissingPlaceholder("{{content}}")
        );
    }

    #[test]
    fn test_placeholders_are_substituted() {
        let renderer = TemplateRenderer::new("{{workspace}}|{{title}}|{{content}}").unwrap();

        let html = renderer
            .render(&update("Q3 <numbers>", "<p>Revenue up</p>"), &workspace("Tom & Co"))
            .unwrap();

        assert_eq!(html, "Tom &amp; Co|Q3 &lt;numbers&gt;|<p>Revenue up</p>");
    }

    #[test]
    fn test_content_placeholders_are_not_expanded() {
        let renderer = TemplateRenderer::new("{{content}}").unwrap();

        let html = renderer
            .render(&update("Title", "literal {{title}}"), &workspace("Acme"))
            .unwrap();

        assert_eq!(html, "literal {{title}}");
    }

    #[test]
    fn test_render_content_builds_subject() {
        let renderer = TemplateRenderer::default();

        let content = renderer
            .render_content(&update("Q3 update", "<p>hi</p>"), &workspace("Acme"))
            .unwrap();

        assert_eq!(&*content.subject, "Acme: Q3 update");
        assert!(content.html.contains("<p>hi</p>"));
        assert!(content.html.contains("<h1>Q3 update</h1>"));
    }

    #[test]
    fn test_empty_title_is_rejected() {
        let renderer = TemplateRenderer::default();

        assert_eq!(
            renderer
                .render_content(&update("  ", "<p>hi</p>"), &workspace("Acme"))
                .unwrap_err(),
            RenderError::EmptyTitle
        );
    }
}
