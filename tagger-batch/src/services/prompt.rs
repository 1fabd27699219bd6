//! Classification request payloads
//!
//! One chat-completion body per song. The system message carries the closed
//! domains so the model answers with a JSON object the result processor can
//! validate.

use super::input_preparer::ID_ALIASES;
use super::taxonomy::Taxonomy;
use crate::models::{Accessibility, ClassificationRequest, Energy, InputRecord};
use serde_json::{json, Value};

const TEMPERATURE: f64 = 0.2;

/// Renders [`ClassificationRequest`]s for one run
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    model: String,
    endpoint: String,
    system_prompt: String,
}

impl PromptBuilder {
    pub fn new(model: impl Into<String>, endpoint: impl Into<String>, taxonomy: &Taxonomy) -> Self {
        Self {
            model: model.into(),
            endpoint: endpoint.into(),
            system_prompt: system_prompt(taxonomy),
        }
    }

    /// Request line for one accepted record
    pub fn request_for(&self, record: &InputRecord, columns: &[String]) -> ClassificationRequest {
        let body = json!({
            "model": self.model,
            "temperature": TEMPERATURE,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": user_message(record, columns) },
            ],
        });

        ClassificationRequest::new(record.correlation_id.clone(), &self.endpoint, body)
    }
}

fn system_prompt(taxonomy: &Taxonomy) -> String {
    let energies: Vec<&str> = Energy::ALL.iter().map(|e| e.label()).collect();
    let accessibility: Vec<&str> = Accessibility::ALL.iter().map(|a| a.label()).collect();

    format!(
        "You are a music curator classifying songs for playlist programming.\n\
         Research the song from its title and artist, then answer with a single JSON object:\n\
         {{\"status\": \"SUCCESS\", \"subgenre\": string, \"secondary_subgenres\": [string], \
         \"energy\": string, \"accessibility\": string, \"reasoning\": string}}\n\
         Rules:\n\
         - subgenre and every secondary subgenre MUST come from this list: {subgenres}.\n\
         - secondary_subgenres holds at most 2 entries, no duplicates, never the primary subgenre.\n\
         - energy is one of: {energies}. Judge the whole track, not only its tempo.\n\
         - accessibility is one of: {accessibility}.\n\
         - reasoning explains the choices in one or two sentences.\n\
         - If the title/artist do not identify a real song, answer \
         {{\"status\": \"INVALID_INPUT\", \"reason\": string}}.\n\
         - If you cannot find enough context to decide confidently, answer with your best \
         classification and \"status\": \"REQUIRES_HUMAN_REVIEW\" plus a \"reason\".",
        subgenres = taxonomy.names().join(", "),
        energies = energies.join(", "),
        accessibility = accessibility.join(", "),
    )
}

fn user_message(record: &InputRecord, columns: &[String]) -> String {
    let mut message = format!("Title: {}\nArtist: {}", record.title, record.artist);

    for (column, value) in columns.iter().zip(&record.fields) {
        let key = column.trim().to_lowercase();
        let required = ID_ALIASES.contains(&key.as_str()) || key == "title" || key == "artist";
        if required || value.trim().is_empty() {
            continue;
        }
        message.push_str(&format!("\n{}: {}", column.trim(), value.trim()));
    }

    message
}

/// Message content of a chat-completion response body
pub fn response_content(body: &Value) -> Option<&str> {
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> InputRecord {
        InputRecord {
            row: 0,
            correlation_id: "row-000000".to_string(),
            id: "42".to_string(),
            title: "Midnight City".to_string(),
            artist: "M83".to_string(),
            fields: vec![
                "42".to_string(),
                "Midnight City".to_string(),
                "M83".to_string(),
                "2011".to_string(),
                "".to_string(),
            ],
        }
    }

    fn columns() -> Vec<String> {
        ["id", "title", "artist", "year", "album"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_request_targets_endpoint_with_correlation_id() {
        let builder = PromptBuilder::new("gpt-4o-mini", "/v1/chat/completions", &Taxonomy::builtin());
        let request = builder.request_for(&record(), &columns());

        assert_eq!(request.correlation_id, "row-000000");
        assert_eq!(request.url, "/v1/chat/completions");
        assert_eq!(request.payload["model"], "gpt-4o-mini");
        assert_eq!(request.payload["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_user_message_includes_non_empty_auxiliary_fields() {
        let message = user_message(&record(), &columns());
        assert_eq!(message, "Title: Midnight City\nArtist: M83\nyear: 2011");
    }

    #[test]
    fn test_user_message_omits_aliased_id_column() {
        let columns: Vec<String> = ["Track_ID", "title", "artist", "year", "album"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let message = user_message(&record(), &columns);
        assert_eq!(message, "Title: Midnight City\nArtist: M83\nyear: 2011");
        assert!(!message.contains("42"));
    }

    #[test]
    fn test_system_prompt_lists_domains() {
        let prompt = system_prompt(&Taxonomy::builtin());
        assert!(prompt.contains("Indie Pop"));
        assert!(prompt.contains("Very High"));
        assert!(prompt.contains("Cheesy"));
    }

    #[test]
    fn test_response_content_extraction() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "{}"}}]});
        assert_eq!(response_content(&body), Some("{}"));
        assert_eq!(response_content(&json!({"choices": []})), None);
    }
}
