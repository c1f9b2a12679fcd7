//! In-memory [`Transport`] double for discovery and dispatch tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use calyps_link::Transport;
use calyps_types::TransportError;

/// One recorded POST: the path and the form as owned pairs.
pub type Call = (String, Vec<(String, String)>);

/// Answers from a script; once the script is spent, repeats `fallback`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<String, TransportError>>>,
    fallback: Result<String, TransportError>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new(
        script: impl IntoIterator<Item = Result<String, TransportError>>,
        fallback: Result<String, TransportError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(answer: Result<String, TransportError>) -> Self {
        Self::new([], answer)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push((
            path.to_string(),
            form.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn refused() -> TransportError {
    TransportError::Connection {
        url: "http://box/m?a=getObjects".into(),
        details: "connection refused".into(),
    }
}

pub fn reset() -> TransportError {
    TransportError::ConnectionReset {
        url: "http://box/m?a=getObjects".into(),
    }
}

pub fn inventory_body(shutters: &[(&str, i64)]) -> String {
    let objects: Vec<String> = shutters
        .iter()
        .map(|(id, level)| {
            format!(
                r#"{{"id":"{id}","name":"Shutter {id}","type":"Rolling_Shutter","eventId":"devices/shutter/{id}/","status":[{{"name":"level","value":"{level}"}},{{"name":"manufacturer_name","value":"Profalux"}}]}}"#
            )
        })
        .collect();
    format!(r#"{{"objects":[{}]}}"#, objects.join(","))
}
