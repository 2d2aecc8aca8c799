//! Operation descriptors, fetch tasks and the provider endpoints that turn
//! them into authenticated HTTP requests.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::http_client::{HttpAuth, HttpMethod, HttpRequest};
use crate::{ProviderId, Symbol, ValidationError};

/// Body format an operation expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseFormat {
    Json,
    /// ZIP archive holding a single XML document (bulk reference data).
    ZipXml,
}

/// Provider-relative request description: path, method and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub provider: ProviderId,
    pub method: HttpMethod,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub format: ResponseFormat,
    /// Top-level JSON keys of which at least one must be present. Empty disables the check.
    pub expected_keys: Vec<String>,
}

impl Operation {
    pub fn new(
        provider: ProviderId,
        method: HttpMethod,
        path: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(ValidationError::InvalidOperationPath { value: path });
        }

        Ok(Self {
            provider,
            method,
            path,
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            format: ResponseFormat::Json,
            expected_keys: Vec::new(),
        })
    }

    pub fn get(provider: ProviderId, path: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(provider, HttpMethod::Get, path)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    pub fn expecting<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Current price and valuation snapshot (PER, PBR, EPS, BPS).
    pub fn kis_quote(symbol: &Symbol) -> Self {
        Self::fixed(ProviderId::Kis, "/uapi/domestic-stock/v1/quotations/inquire-price")
            .with_header("tr_id", "FHKST01010100")
            .with_param("FID_COND_MRKT_DIV_CODE", "J")
            .with_param("FID_INPUT_ISCD", symbol.as_str())
            .expecting(["output"])
    }

    /// Annual financial ratios (ROE, debt ratio, growth rates).
    pub fn kis_financial_ratio(symbol: &Symbol) -> Self {
        Self::fixed(ProviderId::Kis, "/uapi/domestic-stock/v1/finance/financial-ratio")
            .with_header("tr_id", "FHKST66430300")
            .with_param("FID_DIV_CLS_CODE", "0")
            .with_param("fid_cond_mrkt_div_code", "J")
            .with_param("fid_input_iscd", symbol.as_str())
            .expecting(["output"])
    }

    /// Key accounts from a single filing. `report_code` 11011 is the annual report.
    pub fn dart_single_account(corp_code: &Symbol, business_year: u16, report_code: &str) -> Self {
        Self::fixed(ProviderId::Dart, "/api/fnlttSinglAcnt.json")
            .with_param("corp_code", corp_code.as_str())
            .with_param("bsns_year", business_year.to_string())
            .with_param("reprt_code", report_code)
            .expecting(["list"])
    }

    /// Full corporate-code registry, delivered as `CORPCODE.xml` inside a ZIP.
    pub fn dart_corp_codes() -> Self {
        Self::fixed(ProviderId::Dart, "/api/corpCode.xml").with_format(ResponseFormat::ZipXml)
    }

    fn fixed(provider: ProviderId, path: &'static str) -> Self {
        Self {
            provider,
            method: HttpMethod::Get,
            path: path.to_owned(),
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            format: ResponseFormat::Json,
            expected_keys: Vec::new(),
        }
    }
}

/// One unit of batch work. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub symbol: Symbol,
    pub operation: Operation,
    pub max_retries: u32,
}

impl FetchTask {
    pub fn new(symbol: Symbol, operation: Operation, max_retries: u32) -> Self {
        Self {
            symbol,
            operation,
            max_retries,
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.operation.provider
    }
}

/// Base URL plus credentials for one provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub provider: ProviderId,
    pub base_url: String,
    pub auth: Vec<HttpAuth>,
    pub timeout: Duration,
}

impl ProviderEndpoint {
    pub fn new(provider: ProviderId, base_url: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Brokerage API: bearer token plus app key/secret headers.
    pub fn kis(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self::new(ProviderId::Kis, base_url)
            .with_auth(HttpAuth::BearerToken(access_token.into()))
            .with_auth(HttpAuth::Header {
                name: String::from("appkey"),
                value: app_key.into(),
            })
            .with_auth(HttpAuth::Header {
                name: String::from("appsecret"),
                value: app_secret.into(),
            })
    }

    /// Disclosure API: API key as the `crtfc_key` query parameter.
    pub fn dart(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::new(ProviderId::Dart, base_url).with_auth(HttpAuth::QueryParam {
            name: String::from("crtfc_key"),
            value: api_key.into(),
        })
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth.push(auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request(&self, operation: &Operation) -> HttpRequest {
        let url = format!("{}{}", self.base_url, operation.path);
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut request = HttpRequest::new(operation.method, url).with_timeout_ms(timeout_ms);

        if operation.provider == ProviderId::Kis {
            request = request.with_header("content-type", "application/json; charset=utf-8");
        }
        for (name, value) in &operation.headers {
            request = request.with_header(name, value);
        }
        for (name, value) in &operation.params {
            request = request.with_query(name, value);
        }
        for auth in &self.auth {
            auth.apply(&mut request);
        }

        request
    }
}
