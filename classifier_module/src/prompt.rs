use crate::{Classification, ClassifierError};

pub const SYSTEM_PROMPT: &str = "\
You are a document-processing assistant. When given text, you will output exactly one JSON object
and nothing else: no bullet points, no introductory text, no code fences. The JSON MUST have these three fields:
  • summary (a concise prose summary)
  • contains_structured_data (true or false)
  • notes (any caveats or observations)
";

pub(crate) fn build_user_message(filename: &str, text: &str) -> String {
    format!(
        "Document filename: {filename}\n\n\
         Here is the document text:\n\
         ```\n\
         {text}\n\
         ```\n\
         Please respond with one valid JSON object as described."
    )
}

/// Parse the assistant reply into a [`Classification`].
///
/// Models occasionally wrap the object in a code fence or add a sentence
/// around it, so the outermost `{...}` span is tried when the whole reply is
/// not valid JSON.
pub fn parse_classification(raw: &str) -> Result<Classification, ClassifierError> {
    let unfenced = strip_code_fence(raw.trim());
    match serde_json::from_str::<Classification>(unfenced) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let start = unfenced.find('{');
            let end = unfenced.rfind('}');
            if let (Some(start), Some(end)) = (start, end) {
                if start < end {
                    if let Ok(parsed) = serde_json::from_str(&unfenced[start..=end]) {
                        return Ok(parsed);
                    }
                }
            }
            Err(ClassifierError::MalformedResponse {
                raw: raw.to_string(),
                source: err,
            })
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_object() {
        let parsed = parse_classification(
            r#"{"summary":"Invoice from ACME","contains_structured_data":true,"notes":""}"#,
        )
        .expect("parse");
        assert_eq!(parsed.summary, "Invoice from ACME");
        assert!(parsed.contains_structured_data);
        assert_eq!(parsed.category, None);
    }

    #[test]
    fn parses_fenced_object() {
        let raw = "```json\n{\"summary\":\"s\",\"contains_structured_data\":false,\"notes\":\"n\"}\n```";
        let parsed = parse_classification(raw).expect("parse");
        assert_eq!(parsed.notes, "n");
    }

    #[test]
    fn parses_object_surrounded_by_prose() {
        let raw = "Here you go: {\"summary\":\"s\",\"contains_structured_data\":false} Thanks!";
        let parsed = parse_classification(raw).expect("parse");
        assert_eq!(parsed.summary, "s");
        assert_eq!(parsed.notes, "");
    }

    #[test]
    fn rejects_missing_fields() {
        let err = parse_classification(r#"{"notes":"only notes"}"#).expect_err("malformed");
        assert!(matches!(err, ClassifierError::MalformedResponse { .. }));
    }

    #[test]
    fn user_message_embeds_filename_and_text() {
        let message = build_user_message("report.pdf", "total: 42");
        assert!(message.starts_with("Document filename: report.pdf"));
        assert!(message.contains("```\ntotal: 42\n```"));
    }
}
