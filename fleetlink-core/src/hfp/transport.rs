//! HFP transport: a form-encoded HTTP client with rolling-token auth.
//!
//! Grounded in `hlapi/communication/WEBAPIProtocol.py`'s `_request_internal`,
//! `readRegister`/`writeRegister`/`readGroup`/`writeGroup`, and
//! `updateCredentials`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;

use super::token::TokenSync;
use crate::codec::Value;
use crate::error::{FleetError, Result};
use crate::registers::{DataType, RegisterDescriptor};

#[derive(Debug, Clone)]
pub struct HfpConfig {
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// The normalized outcome of one HFP request: the HTTP status mapped to
/// `hlapi`'s result vocabulary, plus any form-decoded body fields.
#[derive(Debug, Clone)]
struct HfpReply {
    result: String,
    fields: HashMap<String, String>,
}

fn http_status_result(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "ERR_AUTH",
        403 => "ERR_FORBIDDEN",
        404 => "ERR_NOTFOUND",
        422 => "ERR_REJECTED",
        _ => "ERR_INTERNAL",
    }
}

/// Percent-decode and split a `application/x-www-form-urlencoded` body
/// into its last-value-wins key/value map, mirroring
/// `urllib.parse.parse_qs(..., keep_blank_values=True)` with last-wins.
fn parse_form_body(body: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in body.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = percent_decode(parts.next().unwrap_or(""));
        let value = percent_decode(parts.next().unwrap_or(""));
        out.insert(key, value);
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

struct State {
    sync: Option<TokenSync>,
    connected: bool,
}

/// An HFP connection to one device's HTTP API.
pub struct HfpTransport {
    ip: String,
    config: HfpConfig,
    client: reqwest::Client,
    state: Mutex<State>,
}

impl HfpTransport {
    pub fn new(ip: String, config: HfpConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("reqwest client builds with default TLS backend disabled");
        HfpTransport {
            ip,
            config,
            client,
            state: Mutex::new(State {
                sync: None,
                connected: false,
            }),
        }
    }

    fn base_url(&self) -> String {
        if self.ip.contains(':') {
            format!("http://[{}]:{}", self.ip, self.config.port)
        } else {
            format!("http://{}:{}", self.ip, self.config.port)
        }
    }

    fn bridge_prefix(unit: Option<u16>) -> String {
        match unit {
            Some(u) => format!("/databus/{u}"),
            None => String::new(),
        }
    }

    /// Reset the connection and re-establish a rolling-token session via
    /// `POST /userid`. Must succeed before any register operation.
    pub async fn resync(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sync = None;
        state.connected = true;

        let mut params = HashMap::new();
        params.insert("user".to_string(), self.config.username.clone());
        drop(state);

        let reply = self.request_internal("POST", "/userid", &params, None, None).await;
        let mut state = self.state.lock().await;
        match reply {
            Ok(r) if r.result == "OK" => {
                let uptime: u64 = r
                    .fields
                    .get("time")
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| FleetError::Framer("userid reply missing time".into()))?;
                let userid: u32 = r
                    .fields
                    .get("userid")
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| FleetError::Framer("userid reply missing userid".into()))?;
                state.sync = Some(TokenSync::new(
                    uptime,
                    userid,
                    self.config.username.clone(),
                    self.config.password.clone(),
                ));
                Ok(())
            }
            Ok(_) => {
                state.connected = false;
                Err(FleetError::AuthFailed)
            }
            Err(e) => {
                state.connected = false;
                Err(e)
            }
        }
    }

    async fn request_internal(
        &self,
        method: &str,
        uri: &str,
        params: &HashMap<String, String>,
        unit: Option<u16>,
        timeout_override: Option<Duration>,
    ) -> Result<HfpReply> {
        {
            let state = self.state.lock().await;
            if !state.connected {
                return Err(FleetError::TransportFatal("hfp not connected".into()));
            }
        }

        let url = format!("{}{}{}", self.base_url(), Self::bridge_prefix(unit), uri);
        let token = {
            let state = self.state.lock().await;
            state.sync.as_ref().map(|s| s.token())
        };

        let mut builder = match method {
            "POST" => self.client.post(&url).form(params),
            _ => self.client.get(&url).query(params),
        };
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("hPDU-auth-v1 {t}"));
        }
        if let Some(t) = timeout_override {
            builder = builder.timeout(t);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(FleetError::TransportTimeout),
            Err(e) => return Err(FleetError::Http(e)),
        };

        let http_status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await.map_err(FleetError::Http)?;

        let fields = if content_type.starts_with("text/plain")
            || content_type.starts_with("application/x-www-form-urlencoded")
        {
            parse_form_body(&body)
        } else {
            HashMap::new()
        };

        let mut fields = fields;
        let result = match fields.remove("result") {
            Some(r) => r,
            None => http_status_result(http_status).to_string(),
        };

        if result == "ERR_AUTH" {
            let mut state = self.state.lock().await;
            state.connected = false;
        }

        Ok(HfpReply { result, fields })
    }

    fn register_url(desc: &RegisterDescriptor) -> String {
        if desc.repeats > 1 {
            format!("/register/{}/{}", desc.mnemonic, desc.repeats)
        } else {
            format!("/register/{}", desc.mnemonic)
        }
    }

    fn compose_write_params(desc: &RegisterDescriptor, value: &Value) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        match value {
            Value::List(items) if desc.repeats > 1 => {
                if items.len() != desc.repeats as usize {
                    return Err(FleetError::Codec(format!(
                        "{}: expected {} repeat values, got {}",
                        desc.mnemonic,
                        desc.repeats,
                        items.len()
                    )));
                }
                for (i, item) in items.iter().enumerate() {
                    out.insert(format!("{}_{}", desc.mnemonic, i + 1), format_value(item));
                }
            }
            single => {
                out.insert(desc.mnemonic.to_string(), format_value(single));
            }
        }
        Ok(out)
    }

    /// Read a single register's value(s).
    pub async fn read_register(&self, desc: &RegisterDescriptor, unit: Option<u16>) -> Result<Value> {
        let reply = self
            .request_internal("GET", &Self::register_url(desc), &HashMap::new(), unit, None)
            .await?;
        if reply.result != "OK" {
            return Err(FleetError::BusNak);
        }
        parse_reply_value(desc, &reply.fields)
    }

    /// Write a single register's value(s).
    pub async fn write_register(&self, desc: &RegisterDescriptor, unit: Option<u16>, value: &Value) -> Result<()> {
        let params = Self::compose_write_params(desc, value)?;
        let reply = self
            .request_internal("POST", &Self::register_url(desc), &params, unit, None)
            .await?;
        if reply.result == "OK" {
            Ok(())
        } else {
            Err(FleetError::ProtocolDenied(reply.result))
        }
    }

    /// Read every register in an SPDM group in a single request.
    pub async fn read_group(
        &self,
        descs: &[&RegisterDescriptor],
        group: &str,
        unit: Option<u16>,
    ) -> Result<HashMap<String, Value>> {
        let reply = self
            .request_internal("GET", &format!("/group/{group}"), &HashMap::new(), unit, None)
            .await?;
        if reply.result != "OK" || reply.fields.is_empty() {
            return Err(FleetError::BusNak);
        }
        let mut out = HashMap::new();
        for desc in descs {
            out.insert(desc.mnemonic.to_string(), parse_reply_value(desc, &reply.fields)?);
        }
        Ok(out)
    }

    /// Write each register marked `true` in `status`; writes never block on
    /// each other, so one denial doesn't affect the rest.
    pub async fn write_group(
        &self,
        descs: &[&RegisterDescriptor],
        unit: Option<u16>,
        data: &HashMap<String, Value>,
        status: &mut HashMap<String, bool>,
    ) {
        for desc in descs {
            let should_write = status.get(desc.mnemonic).copied().unwrap_or(false);
            if !should_write {
                continue;
            }
            let Some(value) = data.get(desc.mnemonic) else {
                status.insert(desc.mnemonic.to_string(), false);
                continue;
            };
            let ok = self.write_register(desc, unit, value).await.is_ok();
            status.insert(desc.mnemonic.to_string(), ok);
        }
    }

    /// Change the active user's credentials, re-syncing the token session
    /// if the changed user is the one currently authenticated.
    pub async fn update_credentials(&self, level: u32, username: &str, new_password: Option<&str>) -> Result<bool> {
        let mut params = HashMap::new();
        params.insert("userid".to_string(), level.to_string());
        params.insert("username".to_string(), username.to_string());
        if let Some(pw) = new_password {
            params.insert("chpasswd".to_string(), "1".to_string());
            params.insert("password".to_string(), pw.to_string());
        }
        let reply = self
            .request_internal("POST", "/save/user", &params, None, None)
            .await?;
        if reply.result != "OK" {
            return Ok(false);
        }

        if let Some(pw) = new_password {
            let mut state = self.state.lock().await;
            let changed_current_user = state.sync.as_ref().map(|s| s.userid()) == Some(level);
            if changed_current_user {
                if let Some(sync) = state.sync.as_mut() {
                    sync.set_credentials(username.to_string(), pw.to_string());
                }
            }
        }
        Ok(true)
    }

    /// A raw request for operations without a register-shaped API, e.g.
    /// unit address changes. `/address` replies with `ERR_REJECTED` are
    /// treated as success: a known firmware quirk on the reply path.
    pub async fn send_raw(&self, uri: &str, method: &str, params: &HashMap<String, String>, unit: Option<u16>) -> Result<()> {
        let reply = self.request_internal(method, uri, params, unit, None).await?;
        if reply.result == "OK" {
            Ok(())
        } else if uri.contains("address") && reply.result == "ERR_REJECTED" {
            Ok(())
        } else {
            Err(FleetError::ProtocolDenied(reply.result))
        }
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Ascii(s) => s.clone(),
        Value::Ipv4(ip) => ip.to_string(),
        Value::Ipv6(s) => s.clone(),
        Value::Fd(v) => format!("{v}"),
        Value::List(_) => String::new(),
    }
}

fn parse_reply_value(desc: &RegisterDescriptor, fields: &HashMap<String, String>) -> Result<Value> {
    if desc.repeats > 1 {
        let mut items = Vec::with_capacity(desc.repeats as usize);
        for i in 1..=desc.repeats {
            let key = format!("{}_{}", desc.mnemonic, i);
            let raw = fields
                .get(&key)
                .ok_or_else(|| FleetError::Framer(format!("hfp reply missing {key}")))?;
            items.push(parse_scalar(desc, raw)?);
        }
        Ok(Value::List(items))
    } else {
        let raw = fields
            .get(desc.mnemonic)
            .ok_or_else(|| FleetError::Framer(format!("hfp reply missing {}", desc.mnemonic)))?;
        parse_scalar(desc, raw)
    }
}

fn parse_scalar(desc: &RegisterDescriptor, raw: &str) -> Result<Value> {
    let parse_err = || FleetError::Codec(format!("{}: malformed hfp value {raw:?}", desc.mnemonic));
    match desc.data_type {
        DataType::Int if desc.length == 6 => Ok(Value::Ascii(raw.to_lowercase())),
        DataType::Int => raw.parse::<u64>().map(Value::Int).map_err(|_| parse_err()),
        DataType::Ascii => {
            let nul_trimmed = raw.split('\0').next().unwrap_or(raw);
            Ok(Value::Ascii(nul_trimmed.to_string()))
        }
        DataType::Ipv4 => raw.parse().map(Value::Ipv4).map_err(|_| parse_err()),
        DataType::Ipv6 => Ok(Value::Ipv6(raw.to_string())),
        DataType::Fd => raw.parse::<f64>().map(Value::Fd).map_err(|_| parse_err()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_form_body_last_value_wins() {
        let fields = parse_form_body("result=OK&device_type=1&device_type=2");
        assert_eq!(fields.get("device_type").unwrap(), "2");
    }

    #[test]
    fn parse_form_body_decodes_percent_escapes() {
        let fields = parse_form_body("name=hello%20world");
        assert_eq!(fields.get("name").unwrap(), "hello world");
    }

    #[test]
    fn http_status_result_maps_known_codes() {
        assert_eq!(http_status_result(200), "OK");
        assert_eq!(http_status_result(401), "ERR_AUTH");
        assert_eq!(http_status_result(599), "ERR_INTERNAL");
    }
}
