//! Validation helpers shared by the validator stage and the business core.

use validator::ValidationErrors;

/// Render `validator` field errors as one line of text.
///
/// Fields are sorted so the same input always yields the same description,
/// which is what travels on the `error` topic back to the caller.
pub fn describe(errors: &ValidationErrors) -> String {
    let field_errors = errors.field_errors();
    let mut fields: Vec<_> = field_errors.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    let messages: Vec<String> = fields
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let msg = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                format!("field: [{}] {}", field, msg)
            })
        })
        .collect();

    if messages.is_empty() {
        "Validation failed".to_string()
    } else {
        messages.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Sample {
        #[validate(length(min = 1, message = "cannot be empty"))]
        b: String,
        #[validate(length(min = 1, message = "cannot be empty"))]
        a: String,
    }

    #[test]
    fn describe_is_sorted_by_field() {
        let errors = Sample {
            a: String::new(),
            b: String::new(),
        }
        .validate()
        .unwrap_err();

        assert_eq!(
            describe(&errors),
            "field: [a] cannot be empty; field: [b] cannot be empty"
        );
    }
}
