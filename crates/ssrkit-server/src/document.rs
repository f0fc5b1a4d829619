//! Full HTML documents around rendered markup.

use serde_json::Value;
use ssrkit_common::{RequestContext, Result, SsrConfig, SsrError};
use std::borrow::Cow;
use std::path::Path;

const PAGE_TEMPLATE: &str = include_str!("../templates/page.html");
const ERROR_TEMPLATE: &str = include_str!("../templates/error.html");

const HMR_SCRIPT: &str = r#"<script>
(function () {
  var source = new EventSource("/hmr");
  source.addEventListener("hmr", function () { window.location.reload(); });
})();
</script>"#;

const PRODUCTION_DIAGNOSTIC: &str = "The page could not be rendered. Please try again later.";

/// What a page is made of, apart from the request context.
#[derive(Debug, Clone)]
pub struct PageSpec {
    /// Server bundle rendered into the page, e.g. `Home.js`
    pub fragment: String,
    /// Component name, the fragment without its extension
    pub component: String,
    /// Template name, used to derive the template id
    pub template: String,
    pub title: Option<String>,
    pub props: Value,
}

impl PageSpec {
    pub fn new(fragment: impl Into<String>, props: Value) -> Self {
        let fragment = fragment.into();
        let component = fragment.strip_suffix(".js").unwrap_or(&fragment).to_string();
        Self {
            template: component.clone(),
            component,
            fragment,
            title: None,
            props,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// `pages/home.html` becomes `pages-home`.
    pub fn template_id(&self) -> String {
        self.template.replace('/', "-").replace(".html", "")
    }
}

/// Substitutes `{{name}}` placeholders into the page and error templates.
#[derive(Debug, Clone)]
pub struct DocumentComposer {
    version: String,
    dev: bool,
    page_template: String,
    error_template: String,
}

impl DocumentComposer {
    /// Composer with the built-in templates.
    pub fn new(version: impl Into<String>, dev: bool) -> Self {
        Self {
            version: version.into(),
            dev,
            page_template: PAGE_TEMPLATE.to_string(),
            error_template: ERROR_TEMPLATE.to_string(),
        }
    }

    /// Built-in templates, replaced by the configured files when set.
    pub fn from_config(config: &SsrConfig) -> Result<Self> {
        let mut composer = Self::new(config.version.clone(), config.dev);
        if let Some(path) = &config.page_template {
            composer.page_template = read_template(path)?;
        }
        if let Some(path) = &config.error_template {
            composer.error_template = read_template(path)?;
        }
        Ok(composer)
    }

    pub fn with_templates(mut self, page: impl Into<String>, error: impl Into<String>) -> Self {
        self.page_template = page.into();
        self.error_template = error.into();
        self
    }

    pub fn is_dev(&self) -> bool {
        self.dev
    }

    pub fn compose(&self, page: &PageSpec, markup: &str, ctx: &RequestContext) -> String {
        let title = page.title.as_deref().unwrap_or(&page.component);
        let user_info = ctx.user.clone().unwrap_or(Value::Null);
        // anonymous pages carry no user global at all
        let user_script = match &ctx.user {
            Some(user) => format!("window.USER_INFO = {};", script_json(user)),
            None => String::new(),
        };

        substitute(&self.page_template, |name| {
            let value = match name {
                "component" => html_escape(&page.component),
                "template_id" => Cow::Owned(html_escape(&page.template_id()).into_owned()),
                "title" => html_escape(title),
                "inner_html" => Cow::Borrowed(markup),
                "lang" => html_escape(&ctx.lang),
                "initial_props" => Cow::Owned(script_json(&page.props)),
                "translations" => Cow::Owned(script_json(&ctx.translations)),
                "website" => Cow::Owned(script_json(&ctx.site)),
                "user_info" => Cow::Owned(script_json(&user_info)),
                "user_script" => Cow::Owned(user_script.clone()),
                "version" => html_escape(&self.version),
                "is_dev" => Cow::Borrowed(if self.dev { "true" } else { "false" }),
                "hmr_script" => Cow::Borrowed(self.hmr_script()),
                _ => return None,
            };
            Some(value)
        })
    }

    /// Diagnostic page for a failed render. Outside development the
    /// diagnostic is replaced by a generic message.
    pub fn error_page(&self, component: &str, request_path: &str, diagnostic: &str) -> String {
        let diagnostic = if self.dev { diagnostic } else { PRODUCTION_DIAGNOSTIC };

        substitute(&self.error_template, |name| {
            let value = match name {
                "component" => html_escape(component),
                "path" => html_escape(request_path),
                "diagnostic" => html_escape(diagnostic),
                "version" => html_escape(&self.version),
                "hmr_script" => Cow::Borrowed(self.hmr_script()),
                _ => return None,
            };
            Some(value)
        })
    }

    fn hmr_script(&self) -> &'static str {
        if self.dev {
            HMR_SCRIPT
        } else {
            ""
        }
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| SsrError::Config(format!("Failed to read template {}: {}", path.display(), e)))
}

/// Single left-to-right pass; substituted text is never rescanned and
/// unknown placeholders are kept verbatim.
fn substitute<'a>(template: &str, mut lookup: impl FnMut(&str) -> Option<Cow<'a, str>>) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

pub fn html_escape(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// JSON that is safe inside an inline `<script>` element.
pub fn script_json(value: &Value) -> String {
    let json = value.to_string();
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(c),
        }
    }
    out
}
