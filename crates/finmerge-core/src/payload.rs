//! Response classification and decoding.
//!
//! Turns one [`HttpResponse`] into either a [`Payload`] or the failure class
//! the retry loop acts on. Provider status fields inside otherwise-2xx bodies
//! are failures too.

use std::io::{Cursor, Read};

use serde_json::Value;
use zip::ZipArchive;

use crate::http_client::HttpResponse;
use crate::operation::{Operation, ResponseFormat};
use crate::outcome::FailureClass;
use crate::ProviderId;

/// KIS message code for "transactions per second exceeded".
const KIS_TPS_EXCEEDED: &str = "EGW00201";
/// DART status for "request limit exceeded".
const DART_LIMIT_EXCEEDED: &str = "020";
const DART_NO_DATA: &str = "013";
const DART_OK: &str = "000";

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Xml { file_name: String, document: String },
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Xml { .. } => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Xml { .. } => None,
        }
    }

    pub fn as_xml(&self) -> Option<&str> {
        match self {
            Self::Xml { document, .. } => Some(document),
            Self::Json(_) => None,
        }
    }
}

/// Why a response could not become a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub class: FailureClass,
    pub detail: String,
}

impl DecodeFailure {
    fn new(class: FailureClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: detail.into(),
        }
    }
}

/// Classify a response for `operation`.
pub fn decode(operation: &Operation, response: &HttpResponse) -> Result<Payload, DecodeFailure> {
    if !response.is_success() {
        return Err(classify_status(operation.provider, response));
    }

    match operation.format {
        ResponseFormat::Json => decode_json(operation, &response.body),
        ResponseFormat::ZipXml => decode_zip(operation, &response.body),
    }
}

fn classify_status(provider: ProviderId, response: &HttpResponse) -> DecodeFailure {
    let status = response.status;
    let body = response.text();

    // Overload codes sometimes arrive with a 500 instead of a 429.
    if let Ok(value) = serde_json::from_str::<Value>(&body) {
        if let Some(failure) = provider_status(provider, &value) {
            if failure.class == FailureClass::Http429 {
                return failure;
            }
        }
    }

    let class = match status {
        429 => FailureClass::Http429,
        500..=599 => FailureClass::Http5xx,
        _ => FailureClass::Http4xx,
    };
    DecodeFailure::new(class, format!("{provider} returned status {status}"))
}

fn decode_json(operation: &Operation, body: &[u8]) -> Result<Payload, DecodeFailure> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        DecodeFailure::new(
            FailureClass::MalformedBody,
            format!("{} response is not valid JSON: {e}", operation.provider),
        )
    })?;

    if let Some(failure) = provider_status(operation.provider, &value) {
        return Err(failure);
    }
    check_expected_keys(operation, &value)?;

    Ok(Payload::Json(value))
}

fn check_expected_keys(operation: &Operation, value: &Value) -> Result<(), DecodeFailure> {
    if operation.expected_keys.is_empty() {
        return Ok(());
    }

    let present = value.as_object().is_some_and(|object| {
        operation
            .expected_keys
            .iter()
            .any(|key| object.contains_key(key))
    });
    if present {
        Ok(())
    } else {
        Err(DecodeFailure::new(
            FailureClass::SemanticError,
            format!(
                "{} response for {} has none of the expected keys [{}]",
                operation.provider,
                operation.path,
                operation.expected_keys.join(", ")
            ),
        ))
    }
}

/// Application-level status carried inside the body, if it signals failure.
fn provider_status(provider: ProviderId, value: &Value) -> Option<DecodeFailure> {
    match provider {
        ProviderId::Kis => {
            let rt_cd = value.get("rt_cd").and_then(Value::as_str)?;
            if rt_cd == "0" {
                return None;
            }
            let msg_cd = value.get("msg_cd").and_then(Value::as_str).unwrap_or_default();
            let msg = value.get("msg1").and_then(Value::as_str).unwrap_or_default();
            let class = if msg_cd == KIS_TPS_EXCEEDED {
                FailureClass::Http429
            } else {
                FailureClass::SemanticError
            };
            Some(DecodeFailure::new(
                class,
                format!("kis rt_cd={rt_cd} msg_cd={msg_cd}: {}", msg.trim()),
            ))
        }
        ProviderId::Dart => {
            let status = value.get("status").and_then(Value::as_str)?;
            let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
            dart_status(status, message)
        }
    }
}

fn dart_status(status: &str, message: &str) -> Option<DecodeFailure> {
    let class = match status {
        DART_OK => return None,
        DART_LIMIT_EXCEEDED => FailureClass::Http429,
        DART_NO_DATA => FailureClass::SemanticError,
        _ => FailureClass::SemanticError,
    };
    Some(DecodeFailure::new(
        class,
        format!("dart status={status}: {}", message.trim()),
    ))
}

fn decode_zip(operation: &Operation, body: &[u8]) -> Result<Payload, DecodeFailure> {
    let mut archive = match ZipArchive::new(Cursor::new(body)) {
        Ok(archive) => archive,
        Err(zip_error) => return Err(explain_non_zip(operation, body, &zip_error.to_string())),
    };

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|e| {
            DecodeFailure::new(
                FailureClass::MalformedBody,
                format!("cannot open archive entry {index}: {e}"),
            )
        })?;
        if file.is_dir() || !file.name().to_ascii_lowercase().ends_with(".xml") {
            continue;
        }

        let file_name = file.name().to_owned();
        let mut document = String::new();
        file.read_to_string(&mut document).map_err(|e| {
            DecodeFailure::new(
                FailureClass::MalformedBody,
                format!("cannot read {file_name} from archive: {e}"),
            )
        })?;
        return Ok(Payload::Xml {
            file_name,
            document,
        });
    }

    Err(DecodeFailure::new(
        FailureClass::MalformedBody,
        format!("{} archive contains no XML document", operation.path),
    ))
}

/// Bulk endpoints answer errors with a small JSON or XML status body instead of a ZIP.
fn explain_non_zip(operation: &Operation, body: &[u8], zip_error: &str) -> DecodeFailure {
    let text = String::from_utf8_lossy(body);

    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        if let Some(failure) = provider_status(operation.provider, &value) {
            return failure;
        }
    }
    if operation.provider == ProviderId::Dart {
        if let Some(status) = xml_element(&text, "status") {
            let message = xml_element(&text, "message").unwrap_or_default();
            if let Some(failure) = dart_status(status, message) {
                return failure;
            }
        }
    }

    DecodeFailure::new(
        FailureClass::MalformedBody,
        format!("{} response is not a ZIP archive: {zip_error}", operation.path),
    )
}

fn xml_element<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;
    use crate::Symbol;

    fn kis_quote() -> Operation {
        Operation::kis_quote(&Symbol::parse("005930").expect("valid"))
    }

    fn zip_with(name: &str, contents: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(contents.as_bytes()).expect("write entry");
        writer.finish().expect("finish archive").into_inner()
    }

    #[test]
    fn accepts_successful_kis_body() {
        let response = HttpResponse::ok_json(
            r#"{"rt_cd":"0","msg_cd":"MCA00000","output":{"per":"12.1"}}"#,
        );

        let payload = decode(&kis_quote(), &response).expect("should decode");

        assert_eq!(payload.as_json().and_then(|v| v["output"]["per"].as_str()), Some("12.1"));
    }

    #[test]
    fn kis_non_zero_rt_cd_is_semantic_error() {
        let response = HttpResponse::ok_json(
            r#"{"rt_cd":"1","msg_cd":"OPSQ0002","msg1":"invalid code"}"#,
        );

        let failure = decode(&kis_quote(), &response).expect_err("must fail");

        assert_eq!(failure.class, FailureClass::SemanticError);
        assert!(failure.detail.contains("invalid code"));
    }

    #[test]
    fn kis_tps_exceeded_is_treated_as_quota_response() {
        let response = HttpResponse::new(
            500,
            r#"{"rt_cd":"1","msg_cd":"EGW00201","msg1":"초당 거래건수를 초과하였습니다."}"#,
        );

        let failure = decode(&kis_quote(), &response).expect_err("must fail");

        assert_eq!(failure.class, FailureClass::Http429);
    }

    #[test]
    fn plain_server_error_is_5xx() {
        let failure = decode(&kis_quote(), &HttpResponse::new(503, "busy")).expect_err("must fail");
        assert_eq!(failure.class, FailureClass::Http5xx);
    }

    #[test]
    fn other_client_errors_are_terminal_4xx() {
        let failure = decode(&kis_quote(), &HttpResponse::new(403, "")).expect_err("must fail");
        assert_eq!(failure.class, FailureClass::Http4xx);
        assert_eq!(failure.class.disposition(), crate::outcome::Disposition::Terminal);
    }

    #[test]
    fn unparseable_json_is_malformed() {
        let failure = decode(&kis_quote(), &HttpResponse::ok_json("<html>gateway</html>"))
            .expect_err("must fail");
        assert_eq!(failure.class, FailureClass::MalformedBody);
    }

    #[test]
    fn missing_expected_keys_is_semantic_error() {
        let failure = decode(&kis_quote(), &HttpResponse::ok_json(r#"{"unexpected":1}"#))
            .expect_err("must fail");
        assert_eq!(failure.class, FailureClass::SemanticError);
    }

    #[test]
    fn dart_status_codes_are_classified() {
        let corp = Symbol::parse("00126380").expect("valid");
        let operation = Operation::dart_single_account(&corp, 2023, "11011");

        let no_data = HttpResponse::ok_json(r#"{"status":"013","message":"조회된 데이타가 없습니다."}"#);
        let limited = HttpResponse::ok_json(r#"{"status":"020","message":"요청 제한을 초과하였습니다."}"#);

        let no_data = decode(&operation, &no_data).expect_err("must fail");
        let limited = decode(&operation, &limited).expect_err("must fail");
        let ok = decode(&operation, &HttpResponse::ok_json(r#"{"status":"000","list":[]}"#));

        assert_eq!(no_data.class, FailureClass::SemanticError);
        assert_eq!(limited.class, FailureClass::Http429);
        assert!(ok.is_ok());
    }

    #[test]
    fn zip_payload_yields_the_xml_document() {
        let body = zip_with(
            "CORPCODE.xml",
            "<result><list><corp_code>00126380</corp_code></list></result>",
        );
        let response = HttpResponse::new(200, body);

        let payload = decode(&Operation::dart_corp_codes(), &response).expect("should unzip");

        match payload {
            Payload::Xml { file_name, document } => {
                assert_eq!(file_name, "CORPCODE.xml");
                assert!(document.contains("00126380"));
            }
            other => panic!("expected xml payload, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_zip_is_malformed() {
        let response = HttpResponse::new(200, b"PK\x03\x04 truncated".to_vec());

        let failure = decode(&Operation::dart_corp_codes(), &response).expect_err("must fail");

        assert_eq!(failure.class, FailureClass::MalformedBody);
    }

    #[test]
    fn xml_status_body_instead_of_zip_is_classified() {
        let response = HttpResponse::new(
            200,
            "<?xml version=\"1.0\"?><result><status>020</status><message>limit</message></result>",
        );

        let failure = decode(&Operation::dart_corp_codes(), &response).expect_err("must fail");

        assert_eq!(failure.class, FailureClass::Http429);
    }
}
