use serde_json::Value;

/// Text message extracted from a webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub wa_id: String,
    pub name: String,
    pub text: String,
}

/// Structural presence check over the standard WhatsApp Business webhook
/// shape. Never panics, whatever the payload looks like.
pub fn is_valid_whatsapp_message(body: &Value) -> bool {
    body.get("object").is_some()
        && body
            .pointer("/entry/0/changes/0/value/messages/0")
            .is_some()
}

/// Pulls sender id, profile name and message text out of the payload.
/// Returns `None` when any of the nested fields is missing or not text.
pub fn extract_message(body: &Value) -> Option<IncomingMessage> {
    let value = body.pointer("/entry/0/changes/0/value")?;

    let wa_id = value.pointer("/contacts/0/wa_id")?.as_str()?;
    let name = value
        .pointer("/contacts/0/profile/name")
        .and_then(Value::as_str)
        .unwrap_or("");
    let text = value.pointer("/messages/0/text/body")?.as_str()?;

    Some(IncomingMessage {
        wa_id: wa_id.to_string(),
        name: name.to_string(),
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "contacts": [{
                            "wa_id": "34600111222",
                            "profile": {"name": "Carlos"}
                        }],
                        "messages": [{
                            "type": "text",
                            "text": {"body": "what is the best restaurant?"}
                        }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn accepts_the_standard_webhook_shape() {
        assert!(is_valid_whatsapp_message(&sample_payload()));
    }

    #[test]
    fn missing_messages_key_is_invalid_without_panicking() {
        let mut body = sample_payload();
        body.pointer_mut("/entry/0/changes/0/value")
            .unwrap()
            .as_object_mut()
            .unwrap()
            .remove("messages");
        assert!(!is_valid_whatsapp_message(&body));
    }

    #[test]
    fn junk_payloads_are_invalid() {
        for body in [json!({}), json!(null), json!("hi"), json!({"entry": []})] {
            assert!(!is_valid_whatsapp_message(&body));
        }
    }

    #[test]
    fn extracts_sender_and_text() {
        let message = extract_message(&sample_payload()).expect("message");
        assert_eq!(
            message,
            IncomingMessage {
                wa_id: "34600111222".to_string(),
                name: "Carlos".to_string(),
                text: "what is the best restaurant?".to_string(),
            }
        );
    }

    #[test]
    fn extraction_fails_cleanly_on_non_text_messages() {
        let mut body = sample_payload();
        *body
            .pointer_mut("/entry/0/changes/0/value/messages/0")
            .unwrap() = json!({"type": "image", "image": {"id": "123"}});
        assert!(extract_message(&body).is_none());
    }
}
