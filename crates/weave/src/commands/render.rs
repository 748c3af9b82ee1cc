//! Render command

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use weave_template::{EmitPolicy, Namespace, Template, TemplateError};

pub struct RenderArgs {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub metadata: Vec<String>,
    pub eat_whitespaces: bool,
    pub eat_blanklines: bool,
}

pub fn execute(args: RenderArgs) -> Result<()> {
    let namespace = parse_metadata(&args.metadata)?;

    let template = match &args.input {
        Some(path) => Template::from_path(path)
            .with_context(|| format!("Failed to read template {}", path.display()))?,
        None => Template::from_reader(std::io::stdin().lock())
            .context("Failed to read template from standard input")?,
    };
    let mut template = template.with_policy(EmitPolicy {
        eat_whitespaces: args.eat_whitespaces,
        eat_blanklines: args.eat_blanklines,
        ..EmitPolicy::default()
    });

    let result = match &args.output {
        Some(path) => template.save(path, namespace).map(|written| {
            tracing::info!(output = %written.display(), "wrote rendered template");
        }),
        None => template.save_to(&mut std::io::stdout().lock(), namespace),
    };
    result.map_err(|err| report(&template, err))
}

/// Print the source listing of a failed render and convert the error.
fn report(template: &Template, err: TemplateError) -> anyhow::Error {
    if let Some(context) = err.context().or(template.exc()) {
        eprint!("{context}");
    }
    anyhow!(err).context(format!("Failed to render {}", template.name()))
}

/// Parse `KEY:VALUE` bindings. Values that are valid JSON keep their type.
pub fn parse_metadata(entries: &[String]) -> Result<Namespace> {
    let mut namespace = Namespace::new();
    for entry in entries {
        let (key, value) = entry
            .split_once(':')
            .with_context(|| format!("Invalid metadata \"{entry}\": expected KEY:VALUE"))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        namespace.insert(key.trim(), value);
    }
    Ok(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_values() {
        let ns = parse_metadata(&[
            "title:Home Page".to_string(),
            "count:3".to_string(),
            "tags:[\"a\", \"b\"]".to_string(),
            "url:http://example.com".to_string(),
        ])
        .unwrap();
        assert_eq!(ns.get("title"), Some(&json!("Home Page")));
        assert_eq!(ns.get("count"), Some(&json!(3)));
        assert_eq!(ns.get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(ns.get("url"), Some(&json!("http://example.com")));
    }

    #[test]
    fn test_metadata_without_separator() {
        assert!(parse_metadata(&["oops".to_string()]).is_err());
    }

    #[test]
    fn test_render_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("page.tmpl");
        std::fs::write(&input, "Hi {# who #}\n").unwrap();
        let output = dir.path().join("site");

        execute(RenderArgs {
            input: Some(input),
            output: Some(output.join("index.html")),
            metadata: vec!["who:there".to_string()],
            eat_whitespaces: false,
            eat_blanklines: false,
        })
        .unwrap();

        let written = std::fs::read_to_string(output.join("index.html")).unwrap();
        assert_eq!(written, "Hi there");
    }
}
