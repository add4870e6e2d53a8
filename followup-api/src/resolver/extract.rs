//! Workspace id extraction from webhook bodies.
//!
//! Slash commands post a form with `team_id`; interactive components post a
//! form whose `payload` field is JSON; the Events API posts JSON. JSON is
//! searched at `team_id`, `team.id`, `authorizations[0].team_id` and
//! `event.team`, in that order. The first non-empty string wins.

use serde_json::Value;
use url::form_urlencoded;

use super::ResolveError;

/// Body encodings the resolver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Form,
    Json,
}

impl BodyKind {
    /// Pick the body kind from a `Content-Type` value, ignoring parameters.
    pub fn from_content_type(content_type: Option<&str>) -> Option<Self> {
        let essence = content_type?
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/x-www-form-urlencoded" => Some(BodyKind::Form),
            "application/json" => Some(BodyKind::Json),
            _ => None,
        }
    }
}

/// Location of the workspace id inside a JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonLocation {
    TeamId,
    TeamObject,
    Authorizations,
    EventTeam,
}

impl JsonLocation {
    const ORDER: [JsonLocation; 4] = [
        JsonLocation::TeamId,
        JsonLocation::TeamObject,
        JsonLocation::Authorizations,
        JsonLocation::EventTeam,
    ];

    fn lookup<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        match self {
            JsonLocation::TeamId => doc.get("team_id"),
            JsonLocation::TeamObject => doc.get("team").and_then(|t| t.get("id")),
            JsonLocation::Authorizations => doc
                .get("authorizations")
                .and_then(|a| a.get(0))
                .and_then(|a| a.get("team_id")),
            JsonLocation::EventTeam => doc.get("event").and_then(|e| e.get("team")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonLocation::TeamId => "team_id",
            JsonLocation::TeamObject => "team.id",
            JsonLocation::Authorizations => "authorizations[0].team_id",
            JsonLocation::EventTeam => "event.team",
        }
    }
}

/// Which rule produced the workspace id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    FormField,
    FormPayload(JsonLocation),
    Json(JsonLocation),
}

impl ExtractionStrategy {
    pub fn describe(&self) -> String {
        match self {
            ExtractionStrategy::FormField => "form.team_id".to_string(),
            ExtractionStrategy::FormPayload(at) => format!("form.payload.{}", at.as_str()),
            ExtractionStrategy::Json(at) => format!("json.{}", at.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub team_id: String,
    pub strategy: ExtractionStrategy,
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn search_json(doc: &Value) -> Option<(String, JsonLocation)> {
    JsonLocation::ORDER
        .iter()
        .find_map(|at| non_empty(at.lookup(doc)).map(|id| (id, *at)))
}

fn malformed(reason: impl Into<String>) -> ResolveError {
    ResolveError::MalformedRequest {
        reason: reason.into(),
    }
}

/// First value of a form field, if present.
pub fn form_field(body: &[u8], name: &str) -> Option<String> {
    form_urlencoded::parse(body)
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Extract the workspace id from a request body.
pub fn extract_team_id(content_type: Option<&str>, body: &[u8]) -> Result<Extracted, ResolveError> {
    let kind = BodyKind::from_content_type(content_type)
        .ok_or_else(|| malformed("unsupported content type"))?;

    let found = match kind {
        BodyKind::Form => {
            let direct = form_field(body, "team_id")
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty());
            match direct {
                Some(team_id) => Some((team_id, ExtractionStrategy::FormField)),
                None => match form_field(body, "payload") {
                    Some(raw) => {
                        let doc: Value = serde_json::from_str(&raw)
                            .map_err(|_| malformed("payload field is not valid JSON"))?;
                        search_json(&doc).map(|(id, at)| (id, ExtractionStrategy::FormPayload(at)))
                    }
                    None => None,
                },
            }
        }
        BodyKind::Json => {
            let doc: Value =
                serde_json::from_slice(body).map_err(|_| malformed("body is not valid JSON"))?;
            search_json(&doc).map(|(id, at)| (id, ExtractionStrategy::Json(at)))
        }
    };

    let (team_id, strategy) = found.ok_or_else(|| malformed("no workspace id in request"))?;
    tracing::debug!(team_id, strategy = %strategy.describe(), "workspace id extracted");
    Ok(Extracted { team_id, strategy })
}

/// The challenge of an Events API `url_verification` handshake, if the body
/// is one.
pub fn url_verification_challenge(content_type: Option<&str>, body: &[u8]) -> Option<String> {
    if BodyKind::from_content_type(content_type) != Some(BodyKind::Json) {
        return None;
    }
    let doc: Value = serde_json::from_slice(body).ok()?;
    if doc.get("type").and_then(Value::as_str) != Some("url_verification") {
        return None;
    }
    non_empty(doc.get("challenge"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM: Option<&str> = Some("application/x-www-form-urlencoded");
    const JSON: Option<&str> = Some("application/json; charset=utf-8");

    fn form(pairs: &[(&str, &str)]) -> Vec<u8> {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
            .into_bytes()
    }

    #[test]
    fn test_direct_field_beats_payload() {
        let body = form(&[("team_id", "T1"), ("payload", r#"{"team":{"id":"T2"}}"#)]);
        let extracted = extract_team_id(FORM, &body).unwrap();
        assert_eq!(extracted.team_id, "T1");
        assert_eq!(extracted.strategy, ExtractionStrategy::FormField);
    }

    #[test]
    fn test_payload_used_when_direct_field_empty() {
        let body = form(&[("team_id", ""), ("payload", r#"{"team":{"id":"T2"}}"#)]);
        let extracted = extract_team_id(FORM, &body).unwrap();
        assert_eq!(extracted.team_id, "T2");
        assert_eq!(
            extracted.strategy,
            ExtractionStrategy::FormPayload(JsonLocation::TeamObject)
        );
    }

    #[test]
    fn test_json_locations_in_order() {
        let cases = [
            (r#"{"team_id":"TA","team":{"id":"TB"}}"#, "TA", JsonLocation::TeamId),
            (r#"{"team_id":"","team":{"id":"TB"}}"#, "TB", JsonLocation::TeamObject),
            (
                r#"{"authorizations":[{"team_id":"TC"}],"event":{"team":"TD"}}"#,
                "TC",
                JsonLocation::Authorizations,
            ),
            (r#"{"event":{"team":"TD"}}"#, "TD", JsonLocation::EventTeam),
        ];
        for (body, expected, location) in cases {
            let extracted = extract_team_id(JSON, body.as_bytes()).unwrap();
            assert_eq!(extracted.team_id, expected, "body {body}");
            assert_eq!(extracted.strategy, ExtractionStrategy::Json(location));
        }
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = extract_team_id(Some("text/plain"), b"team_id=T1").unwrap_err();
        assert!(matches!(err, ResolveError::MalformedRequest { .. }));
        assert!(extract_team_id(None, b"team_id=T1").is_err());
    }

    #[test]
    fn test_undecodable_and_empty_bodies() {
        assert!(extract_team_id(JSON, b"{not json").is_err());
        assert!(extract_team_id(JSON, b"[]").is_err());
        assert!(extract_team_id(FORM, &form(&[("payload", "{oops")])).is_err());
        assert!(extract_team_id(FORM, &form(&[("command", "/followup")])).is_err());
        // Non-string ids do not count.
        assert!(extract_team_id(JSON, br#"{"team_id":42}"#).is_err());
    }

    #[test]
    fn test_url_verification_challenge() {
        let body = br#"{"type":"url_verification","challenge":"3eZbrw1aB","token":"x"}"#;
        assert_eq!(url_verification_challenge(JSON, body), Some("3eZbrw1aB".to_string()));
        assert_eq!(url_verification_challenge(FORM, body), None);
        assert_eq!(
            url_verification_challenge(JSON, br#"{"type":"event_callback","team_id":"T1"}"#),
            None
        );
    }

    #[test]
    fn test_strategy_description() {
        assert_eq!(ExtractionStrategy::FormField.describe(), "form.team_id");
        assert_eq!(
            ExtractionStrategy::FormPayload(JsonLocation::TeamObject).describe(),
            "form.payload.team.id"
        );
    }
}
