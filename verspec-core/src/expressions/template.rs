#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// A `{{ name }}` placeholder; the name may be dotted (`login.body.token`).
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub segments: Vec<Segment>,
}

impl Template {
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var(v) => Some(v.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn is_literal(&self) -> bool {
        self.variables().next().is_none()
    }

    /// Substitutes every placeholder through `lookup`. The first name that
    /// does not resolve is returned as the error.
    pub fn render<F>(&self, mut lookup: F) -> Result<String, TemplateError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(l) => out.push_str(l),
                Segment::Var(name) => match lookup(name) {
                    Some(v) => out.push_str(&v),
                    None => return Err(TemplateError::Unresolved(name.clone())),
                },
            }
        }
        Ok(out)
    }
}

pub fn parse_template(input: &str) -> Result<Template, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        let (lit, after_open) = rest.split_at(start);
        let after_open = &after_open[2..];
        let Some(end) = after_open.find("}}") else {
            return Err(TemplateError::UnclosedPlaceholder);
        };
        let inner = after_open[..end].trim();
        if inner.is_empty() {
            return Err(TemplateError::EmptyPlaceholder);
        }
        if inner
            .chars()
            .any(|c| c.is_whitespace() || c == '{' || c == '}')
        {
            return Err(TemplateError::InvalidName(inner.to_string()));
        }
        if !lit.is_empty() {
            segments.push(Segment::Literal(lit.to_string()));
        }
        segments.push(Segment::Var(inner.to_string()));
        rest = &after_open[end + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }

    Ok(Template { segments })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unclosed `{{{{` placeholder (missing `}}}}`)")]
    UnclosedPlaceholder,
    #[error("empty `{{{{ }}}}` placeholder")]
    EmptyPlaceholder,
    #[error("invalid placeholder name `{0}`")]
    InvalidName(String),
    #[error("unresolved variable `{0}`")]
    Unresolved(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_literals_and_placeholders() {
        let t = parse_template("/users/{{ id }}?q={{login.token}}").unwrap();
        assert_eq!(
            t.segments,
            vec![
                Segment::Literal("/users/".to_string()),
                Segment::Var("id".to_string()),
                Segment::Literal("?q=".to_string()),
                Segment::Var("login.token".to_string()),
            ]
        );
    }

    #[test]
    fn json_braces_are_literal() {
        let t = parse_template(r#"{"a": {"b": 1}}"#).unwrap();
        assert!(t.is_literal());
    }

    #[test]
    fn unclosed_placeholder_is_error() {
        assert_eq!(
            parse_template("/x/{{id").unwrap_err(),
            TemplateError::UnclosedPlaceholder
        );
    }

    #[test]
    fn render_reports_first_missing_name() {
        let t = parse_template("{{a}}-{{b}}").unwrap();
        let err = t
            .render(|n| (n == "a").then(|| "1".to_string()))
            .unwrap_err();
        assert_eq!(err, TemplateError::Unresolved("b".to_string()));
    }
}
