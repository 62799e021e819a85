//! Scan-wide settings
//!
//! Read leniently from the `[scanner]` table: a bad value is logged and the
//! default kept, so a broken config file never stops a scan from starting.
//! The counting setters take signed input and ignore anything out of range,
//! keeping the last good value.

use regex::Regex;
use serde::{Deserialize, Serialize};
use toml::{Table, Value};

use super::variant::{NameValuePair, VariantKind};

/// A parameter that is never attacked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedParam {
    /// Regex matched against the parameter name
    pub name: String,

    /// Only exclude in this encoding; `None` means every encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<VariantKind>,

    /// Only exclude on URLs matching this regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ExcludedParam {
    pub fn new(name: &str, kind: Option<VariantKind>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            url: None,
        }
    }
}

/// Compiled form of the exclusion list
#[derive(Debug, Clone, Default)]
pub struct ParamExclusions {
    rules: Vec<(Regex, Option<VariantKind>, Option<Regex>)>,
}

impl ParamExclusions {
    /// Compile `params`; rules with an invalid regex are dropped with a warning
    pub fn compile(params: &[ExcludedParam]) -> Self {
        let mut rules = Vec::with_capacity(params.len());
        for param in params {
            let name = match Regex::new(&param.name) {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(pattern = %param.name, error = %e, "Ignoring excluded parameter with invalid name regex");
                    continue;
                }
            };
            let url = match param.url.as_deref().map(Regex::new).transpose() {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(pattern = ?param.url, error = %e, "Ignoring excluded parameter with invalid url regex");
                    continue;
                }
            };
            rules.push((name, param.kind, url));
        }
        Self { rules }
    }

    pub fn is_excluded(&self, url: &str, pair: &NameValuePair) -> bool {
        self.rules.iter().any(|(name, kind, url_re)| {
            kind.map_or(true, |k| k == pair.kind)
                && url_re.as_ref().map_or(true, |re| re.is_match(url))
                && name.is_match(&pair.name)
        })
    }
}

fn default_excluded_params() -> Vec<ExcludedParam> {
    vec![
        ExcludedParam::new(r"(?i)^asp\.net_sessionid$", Some(VariantKind::Cookie)),
        ExcludedParam::new(r"(?i)^aspsessionid.*$", Some(VariantKind::Cookie)),
        ExcludedParam::new(r"(?i)^siteserver$", Some(VariantKind::Cookie)),
        ExcludedParam::new(r"(?i)^cfid$", Some(VariantKind::Cookie)),
        ExcludedParam::new(r"(?i)^cftoken$", Some(VariantKind::Cookie)),
        ExcludedParam::new(r"(?i)^phpsessid$", None),
        ExcludedParam::new(r"(?i)^jsessionid$", None),
        ExcludedParam::new(r"(?i)^sessid$", None),
        ExcludedParam::new(r"^__VIEWSTATE$", Some(VariantKind::Form)),
        ExcludedParam::new(r"^__EVENTVALIDATION$", Some(VariantKind::Form)),
        ExcludedParam::new(r"^__EVENTTARGET$", Some(VariantKind::Form)),
        ExcludedParam::new(r"^__EVENTARGUMENT$", Some(VariantKind::Form)),
        ExcludedParam::new(r"^javax\.faces\.ViewState$", Some(VariantKind::Form)),
    ]
}

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannerParam {
    host_per_scan: usize,
    thread_per_host: usize,
    delay_in_ms: u64,

    /// Refresh anti-CSRF tokens before each attack request
    pub handle_anti_csrf: bool,

    pub target_params_url: bool,
    pub target_params_form: bool,
    pub target_params_multipart_form: bool,
    pub target_params_xml: bool,
    pub target_params_json: bool,
    pub target_params_gwt: bool,
    pub target_params_odata_id: bool,
    pub target_params_odata_filter: bool,
    pub target_params_header: bool,
    pub target_params_cookie: bool,
    pub target_params_url_path: bool,

    /// Attack headers even on requests with no query or body parameters
    pub scan_headers_all_requests: bool,

    /// Tag every attack request with `X-Ancarna-Scan-Id: <plugin id>`
    pub inject_plugin_id_in_header: bool,

    /// Per plugin and host; 0 is unlimited
    pub max_rule_duration_in_mins: u64,

    /// Whole scan; 0 is unlimited
    pub max_scan_duration_in_mins: u64,

    pub excluded_params: Vec<ExcludedParam>,
}

impl Default for ScannerParam {
    fn default() -> Self {
        Self {
            host_per_scan: 2,
            thread_per_host: 1,
            delay_in_ms: 0,
            handle_anti_csrf: false,
            target_params_url: true,
            target_params_form: true,
            target_params_multipart_form: true,
            target_params_xml: true,
            target_params_json: true,
            target_params_gwt: true,
            target_params_odata_id: true,
            target_params_odata_filter: true,
            target_params_header: false,
            target_params_cookie: false,
            target_params_url_path: false,
            scan_headers_all_requests: false,
            inject_plugin_id_in_header: false,
            max_rule_duration_in_mins: 0,
            max_scan_duration_in_mins: 0,
            excluded_params: default_excluded_params(),
        }
    }
}

/// Every key `from_table` reads, aliases included
const KNOWN_KEYS: &[&str] = &[
    "host_per_scan",
    "hostPerScan",
    "thread_per_host",
    "threadPerHost",
    "delay_in_ms",
    "delayInMs",
    "max_rule_duration_in_mins",
    "maxRuleDurationInMins",
    "max_scan_duration_in_mins",
    "maxScanDurationInMins",
    "handle_anti_csrf",
    "antiCSFR",
    "handleAntiCSRFTokens",
    "target_params_url",
    "targetParamsUrl",
    "target_params_form",
    "targetParamsForm",
    "target_params_multipart_form",
    "targetParamsMultiPartForm",
    "target_params_xml",
    "targetParamsXml",
    "target_params_json",
    "targetParamsJson",
    "target_params_gwt",
    "targetParamsGWT",
    "targetParamsGwt",
    "target_params_odata_id",
    "targetParamsODataId",
    "target_params_odata_filter",
    "targetParamsODataFilter",
    "target_params_header",
    "targetParamsHeader",
    "target_params_cookie",
    "targetParamsCookie",
    "target_params_url_path",
    "targetParamsUrlPath",
    "scan_headers_all_requests",
    "scanHeadersAllRequests",
    "inject_plugin_id_in_header",
    "injectPluginIdInHeader",
    "excluded_params",
    "excludedParams",
];

/// Keys in `table` that no setting reads
fn unknown_keys(table: &Table) -> Vec<&str> {
    table
        .keys()
        .map(String::as_str)
        .filter(|k| !KNOWN_KEYS.contains(k))
        .collect()
}

/// First key present in `table` out of `keys` (snake_case name, then aliases)
fn lookup<'a>(table: &'a Table, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
    keys.iter().find_map(|k| table.get(*k).map(|v| (*k, v)))
}

fn read_int(table: &Table, keys: &[&'static str]) -> Option<i64> {
    let (key, value) = lookup(table, keys)?;
    match value {
        Value::Integer(i) => Some(*i),
        Value::String(s) => match s.trim().parse() {
            Ok(i) => Some(i),
            Err(_) => {
                tracing::warn!(key, value = %s, "Ignoring non-numeric scanner setting");
                None
            }
        },
        other => {
            tracing::warn!(key, value = %other, "Ignoring non-numeric scanner setting");
            None
        }
    }
}

fn read_bool(table: &Table, keys: &[&'static str], target: &mut bool) {
    let Some((key, value)) = lookup(table, keys) else {
        return;
    };
    match value {
        Value::Boolean(b) => *target = *b,
        Value::String(s) if s.eq_ignore_ascii_case("true") => *target = true,
        Value::String(s) if s.eq_ignore_ascii_case("false") => *target = false,
        other => tracing::warn!(key, value = %other, "Ignoring non-boolean scanner setting"),
    }
}

impl ScannerParam {
    /// Build from the `[scanner]` table. `None` or an empty table gives defaults.
    pub fn from_table(table: Option<&Table>) -> Self {
        let mut param = Self::default();
        let Some(table) = table else {
            return param;
        };

        for key in unknown_keys(table) {
            tracing::warn!(key, "Ignoring unknown scanner setting");
        }

        if let Some(v) = read_int(table, &["host_per_scan", "hostPerScan"]) {
            param.set_host_per_scan(v);
        }
        if let Some(v) = read_int(table, &["thread_per_host", "threadPerHost"]) {
            param.set_thread_per_host(v);
        }
        if let Some(v) = read_int(table, &["delay_in_ms", "delayInMs"]) {
            param.set_delay_in_ms(v);
        }
        if let Some(v) = read_int(table, &["max_rule_duration_in_mins", "maxRuleDurationInMins"]) {
            match u64::try_from(v) {
                Ok(v) => param.max_rule_duration_in_mins = v,
                Err(_) => tracing::warn!(value = v, "Ignoring negative max_rule_duration_in_mins"),
            }
        }
        if let Some(v) = read_int(table, &["max_scan_duration_in_mins", "maxScanDurationInMins"]) {
            match u64::try_from(v) {
                Ok(v) => param.max_scan_duration_in_mins = v,
                Err(_) => tracing::warn!(value = v, "Ignoring negative max_scan_duration_in_mins"),
            }
        }

        read_bool(table, &["handle_anti_csrf", "antiCSFR", "handleAntiCSRFTokens"], &mut param.handle_anti_csrf);
        read_bool(table, &["target_params_url", "targetParamsUrl"], &mut param.target_params_url);
        read_bool(table, &["target_params_form", "targetParamsForm"], &mut param.target_params_form);
        read_bool(
            table,
            &["target_params_multipart_form", "targetParamsMultiPartForm"],
            &mut param.target_params_multipart_form,
        );
        read_bool(table, &["target_params_xml", "targetParamsXml"], &mut param.target_params_xml);
        read_bool(table, &["target_params_json", "targetParamsJson"], &mut param.target_params_json);
        read_bool(table, &["target_params_gwt", "targetParamsGWT", "targetParamsGwt"], &mut param.target_params_gwt);
        read_bool(
            table,
            &["target_params_odata_id", "targetParamsODataId"],
            &mut param.target_params_odata_id,
        );
        read_bool(
            table,
            &["target_params_odata_filter", "targetParamsODataFilter"],
            &mut param.target_params_odata_filter,
        );
        read_bool(table, &["target_params_header", "targetParamsHeader"], &mut param.target_params_header);
        read_bool(table, &["target_params_cookie", "targetParamsCookie"], &mut param.target_params_cookie);
        read_bool(table, &["target_params_url_path", "targetParamsUrlPath"], &mut param.target_params_url_path);
        read_bool(table, &["scan_headers_all_requests", "scanHeadersAllRequests"], &mut param.scan_headers_all_requests);
        read_bool(
            table,
            &["inject_plugin_id_in_header", "injectPluginIdInHeader"],
            &mut param.inject_plugin_id_in_header,
        );

        if let Some((key, value)) = lookup(table, &["excluded_params", "excludedParams"]) {
            match value.clone().try_into::<Vec<ExcludedParam>>() {
                Ok(list) => param.excluded_params = list,
                Err(e) => tracing::warn!(key, error = %e, "Ignoring malformed excluded parameter list"),
            }
        }

        param
    }

    pub fn host_per_scan(&self) -> usize {
        self.host_per_scan
    }

    pub fn thread_per_host(&self) -> usize {
        self.thread_per_host
    }

    pub fn delay_in_ms(&self) -> u64 {
        self.delay_in_ms
    }

    /// Values below 1 are ignored
    pub fn set_host_per_scan(&mut self, value: i64) {
        match usize::try_from(value) {
            Ok(v) if v >= 1 => self.host_per_scan = v,
            _ => tracing::warn!(value, kept = self.host_per_scan, "Invalid host_per_scan"),
        }
    }

    /// Values below 1 are ignored
    pub fn set_thread_per_host(&mut self, value: i64) {
        match usize::try_from(value) {
            Ok(v) if v >= 1 => self.thread_per_host = v,
            _ => tracing::warn!(value, kept = self.thread_per_host, "Invalid thread_per_host"),
        }
    }

    /// Negative values are ignored
    pub fn set_delay_in_ms(&mut self, value: i64) {
        match u64::try_from(value) {
            Ok(v) => self.delay_in_ms = v,
            Err(_) => tracing::warn!(value, kept = self.delay_in_ms, "Invalid delay_in_ms"),
        }
    }

    /// Whether parameter plugins should attack this encoding
    pub fn is_target_enabled(&self, kind: VariantKind) -> bool {
        match kind {
            VariantKind::Query => self.target_params_url,
            VariantKind::Form => self.target_params_form,
            VariantKind::Multipart => self.target_params_multipart_form,
            VariantKind::Xml => self.target_params_xml,
            VariantKind::Json => self.target_params_json,
            VariantKind::Gwt => self.target_params_gwt,
            VariantKind::ODataId => self.target_params_odata_id,
            VariantKind::ODataFilter => self.target_params_odata_filter,
            VariantKind::Header => self.target_params_header,
            VariantKind::Cookie => self.target_params_cookie,
            VariantKind::UrlPath => self.target_params_url_path,
        }
    }

    /// Enabled encodings, in the order they are attacked
    pub fn target_kinds(&self) -> Vec<VariantKind> {
        VariantKind::all()
            .iter()
            .copied()
            .filter(|k| self.is_target_enabled(*k))
            .collect()
    }

    pub fn exclusions(&self) -> ParamExclusions {
        ParamExclusions::compile(&self.excluded_params)
    }
}
