use fake::faker::internet::en::FreeEmail;
use fake::faker::lorem::en::Word;
use fake::faker::name::en::{LastName, Name};
use fake::Fake;
use rand::Rng;

use mocksmith_interact::Request;

use crate::PluginError;

/// Variable-substitution context over the JSON view of one request.
pub struct RenderContext {
    request: serde_json::Value,
}

impl RenderContext {
    pub fn new(request: &Request) -> Self {
        let request = serde_json::to_value(request).unwrap_or(serde_json::Value::Null);
        Self { request }
    }

    /// Substitution rules:
    /// - `$request.<path>` resolves a dotted JSON path into the marshaled
    ///   request; a missing path renders as the empty string.
    /// - `$mock.<kind>` renders pseudo-random fake data; unknown kinds
    ///   render as the literal `<kind>`.
    /// - Anything else is returned unchanged.
    pub fn render(&self, token: &str) -> String {
        let (scope, rest) = split_first_segment(token, '.');
        match scope {
            "$request" => self.lookup_request(rest),
            "$mock" => fake_value(rest),
            _ => token.to_string(),
        }
    }

    /// Renders a body template with `{{ expr }}` placeholders; the inner
    /// expression is trimmed and substituted. Text with no placeholders is
    /// returned byte-identical.
    pub fn render_template(&self, template: &str) -> Result<String, PluginError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(PluginError::Template("missing closing tag }}".to_string()));
            };
            out.push_str(&self.render(after[..end].trim()));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn lookup_request(&self, path: &str) -> String {
        let mut current = &self.request;
        for segment in path.split('.') {
            current = match current {
                serde_json::Value::Object(map) => match map.get(segment) {
                    Some(value) => value,
                    None => return String::new(),
                },
                serde_json::Value::Array(items) => match segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index))
                {
                    Some(value) => value,
                    None => return String::new(),
                },
                _ => return String::new(),
            };
        }
        json_to_string(current)
    }
}

fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}

fn fake_value(kind: &str) -> String {
    match kind {
        "name" => Name().fake(),
        "lastname" => LastName().fake(),
        "email" => FreeEmail().fake(),
        "url" => {
            let domain: String = Word().fake();
            let segment: String = Word().fake();
            format!("https://www.{}.com/{}", domain.to_lowercase(), segment.to_lowercase())
        }
        "price" => format!("{:.2}", rand::thread_rng().gen_range(0.0..10000.0)),
        other => other.to_string(),
    }
}

fn split_first_segment<'a>(input: &'a str, separator: char) -> (&'a str, &'a str) {
    match input.find(separator) {
        Some(index) => (&input[..index], &input[index + 1..]),
        None => (input, ""),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use mocksmith_interact::{Body, Protocol};

    use super::*;

    fn request() -> Request {
        let mut header = HashMap::new();
        header.insert("uid".to_string(), "42".to_string());
        Request {
            protocol: Protocol::Http,
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: "/greet".to_string(),
            header,
            body: Body::new(r#"{"user":{"name":"ada"},"tags":["x","y"]}"#.as_bytes().to_vec()),
        }
    }

    #[test]
    fn request_paths_resolve_headers_and_body() {
        let ctx = RenderContext::new(&request());
        assert_eq!(ctx.render("$request.header.uid"), "42");
        assert_eq!(ctx.render("$request.method"), "GET");
        assert_eq!(ctx.render("$request.body.user.name"), "ada");
        assert_eq!(ctx.render("$request.body.tags.1"), "y");
    }

    #[test]
    fn missing_request_path_renders_empty() {
        let ctx = RenderContext::new(&request());
        assert_eq!(ctx.render("$request.header.missing"), "");
        assert_eq!(ctx.render("$request.body.user.name.deep"), "");
    }

    #[test]
    fn unknown_mock_kind_renders_literal() {
        let ctx = RenderContext::new(&request());
        assert_eq!(ctx.render("$mock.unicorn"), "unicorn");
    }

    #[test]
    fn known_mock_kinds_render_nonempty() {
        let ctx = RenderContext::new(&request());
        for kind in ["name", "lastname", "email", "url"] {
            assert!(!ctx.render(&format!("$mock.{kind}")).is_empty(), "{kind}");
        }
        let price: f64 = ctx.render("$mock.price").parse().unwrap();
        assert!((0.0..=10000.0).contains(&price));
    }

    #[test]
    fn plain_tokens_pass_through() {
        let ctx = RenderContext::new(&request());
        assert_eq!(ctx.render("hello"), "hello");
        assert_eq!(ctx.render("$other.thing"), "$other.thing");
    }

    #[test]
    fn template_without_placeholders_is_identical() {
        let ctx = RenderContext::new(&request());
        let text = r#"{"static": true}"#;
        assert_eq!(ctx.render_template(text).unwrap(), text);
    }

    #[test]
    fn template_renders_trimmed_expressions() {
        let ctx = RenderContext::new(&request());
        assert_eq!(
            ctx.render_template("hello {{ $request.header.uid }}!").unwrap(),
            "hello 42!"
        );
    }

    #[test]
    fn unclosed_template_tag_errors() {
        let ctx = RenderContext::new(&request());
        assert!(matches!(
            ctx.render_template("hello {{ $request.header.uid"),
            Err(PluginError::Template(_))
        ));
    }
}
