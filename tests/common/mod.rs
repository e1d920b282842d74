//! In-process fake CC300 controller speaking EMI over any byte stream.

#![allow(dead_code)]

use imm_daq::emi::framing::{decode_frame, encode_frame, read_frame};
use imm_daq::emi::XmlElement;
use imm_daq::registry::ParamRow;
use imm_daq::DaqConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream,
};
use tokio::net::TcpListener;

/// Transport bytes the controller puts in front of some responses.
const HEADER: &[u8] = b"\x00\x01";

pub struct FakeController {
    pub values: Mutex<HashMap<String, String>>,
    pub login_attempts: AtomicU32,
    pub requests: Mutex<Vec<String>>,
    /// Set if a request arrived while another one was still unanswered.
    pub overlapped: AtomicBool,
    /// Grant a session id from this login attempt on; `None` never grants.
    grant_login_from: Option<u32>,
    response_delay: Duration,
    /// Hang up after this many requests.
    hang_up_after: Option<usize>,
}

impl Default for FakeController {
    fn default() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            login_attempts: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            overlapped: AtomicBool::new(false),
            grant_login_from: Some(1),
            response_delay: Duration::ZERO,
            hang_up_after: None,
        }
    }
}

impl FakeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_login_from(mut self, attempt: Option<u32>) -> Self {
        self.grant_login_from = attempt;
        self
    }

    pub fn response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn hang_up_after(mut self, requests: usize) -> Self {
        self.hang_up_after = Some(requests);
        self
    }

    pub fn with_value(self, uri: &str, value: &str) -> Self {
        self.values
            .lock()
            .unwrap()
            .insert(uri.to_string(), value.to_string());
        self
    }

    pub fn value(&self, uri: &str) -> Option<String> {
        self.values.lock().unwrap().get(uri).cloned()
    }

    pub fn request_count(&self, name: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == name)
            .count()
    }

    /// Serve requests until the peer hangs up.
    pub async fn serve<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (rd, mut wr) = tokio::io::split(stream);
        let mut reader = BufReader::new(rd);
        let mut served = 0usize;

        while let Ok(Some(frame)) = read_frame(&mut reader, usize::MAX).await {
            if self.hang_up_after.is_some_and(|n| served >= n) {
                return;
            }
            served += 1;

            let request = decode_frame(&frame).unwrap();
            self.requests.lock().unwrap().push(request.name.clone());

            if !self.response_delay.is_zero() {
                tokio::time::sleep(self.response_delay).await;
                let pending =
                    tokio::time::timeout(Duration::from_millis(1), reader.fill_buf()).await;
                if matches!(pending, Ok(Ok(buf)) if !buf.is_empty()) {
                    self.overlapped.store(true, Ordering::SeqCst);
                }
            }

            let bytes = match self.respond(&request) {
                Some(response) => {
                    let mut bytes = HEADER.to_vec();
                    bytes.extend(encode_frame(&response).unwrap());
                    bytes
                }
                None => b"???\x19".to_vec(),
            };
            if wr.write_all(&bytes).await.is_err() {
                return;
            }
        }
    }

    fn respond(&self, request: &XmlElement) -> Option<XmlElement> {
        let response = match request.name.as_str() {
            "loginRequest" => {
                let attempt = self.login_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let response = XmlElement::new("loginResponse");
                if self.grant_login_from.is_some_and(|from| attempt >= from) {
                    response.attr("sessionid", format!("S{}", attempt))
                } else {
                    response
                }
            }
            "logoutRequest" => XmlElement::new("logoutResponse"),
            "getMessagesRequest" => XmlElement::new("getMessagesResponse")
                .child(XmlElement::new("messages")),
            "getParameterValuesRequest" => {
                let values = self.values.lock().unwrap();
                let mut parameters = XmlElement::new("parameters");
                for p in request.find_all("parameters/parameter") {
                    let uri = p.get("uri").unwrap_or_default();
                    if uri.starts_with("garbage") {
                        return None;
                    }
                    if let Some(v) = values.get(uri) {
                        parameters = parameters.child(
                            XmlElement::new("parameter")
                                .attr("uri", uri)
                                .attr("parameterValue", v.as_str()),
                        );
                    }
                }
                XmlElement::new("getParameterValuesResponse").child(parameters)
            }
            "setParameterValueRequest" => {
                let uri = request.get("uri").unwrap_or_default().to_string();
                let value = request.get("parameterValue").unwrap_or_default().to_string();
                self.values.lock().unwrap().insert(uri, value);
                XmlElement::new("setParameterValueResponse")
            }
            "getParameterDetailsRequest" => XmlElement::new("getParameterDetailsResponse")
                .attr("uri", request.get("uri").unwrap_or_default())
                .attr("unit", "bar"),
            "getParameterPhraseRequest" => {
                XmlElement::new("getParameterPhraseResponse").attr("text", "Holding pressure")
            }
            "getRecordDataRequest" => XmlElement::new("getRecordDataResponse")
                .child(XmlElement::new("record").attr("number", "1")),
            _ => return None,
        };
        Some(response)
    }
}

/// Serve `fake` on one end of an in-memory pipe and return the other end.
pub fn duplex(fake: &Arc<FakeController>) -> DuplexStream {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(Arc::clone(fake).serve(server));
    client
}

/// A peer that accepts requests and never answers.
pub fn silent_peer() -> DuplexStream {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let mut sink = Vec::new();
        let _ = server.read_to_end(&mut sink).await;
    });
    client
}

/// Serve `fake` on a loopback TCP port, one connection at a time.
pub async fn tcp(fake: &Arc<FakeController>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let fake = Arc::clone(fake);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            Arc::clone(&fake).serve(stream).await;
        }
    });
    port
}

pub fn param(name: &str, act: &str, set: &str) -> ParamRow {
    ParamRow {
        name: name.to_string(),
        enable: 1,
        path_act_value: act.to_string(),
        path_set_value: set.to_string(),
        unit: "bar".to_string(),
        ..ParamRow::default()
    }
}

pub fn threshold_param(name: &str, act: &str, low: &str, high: &str) -> ParamRow {
    ParamRow {
        name: name.to_string(),
        enable: 1,
        path_act_value: act.to_string(),
        path_set_low_value: low.to_string(),
        path_set_high_value: high.to_string(),
        unit: "mm".to_string(),
        ..ParamRow::default()
    }
}

pub fn config(parameters: Vec<ParamRow>) -> DaqConfig {
    let mut config = DaqConfig::default();
    config.machine.username = "op".to_string();
    config.machine.password = "pw".to_string();
    config.parameters = parameters;
    config
}
