//! Parameter access on top of an [`EmiSession`]
//!
//! Named machine variables (URIs) are read in batches and written one at a
//! time. Every read is timestamped in software: wall-clock time is taken just
//! before the request goes out and just after the response is decoded, and the
//! sample is stamped with the midpoint.

use super::messages;
use super::session::{EmiError, EmiSession};
use super::xml::XmlElement;
use crate::sample::{midpoint, Sample, SampleValue};
use chrono::Local;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Parameter-level client for one CC300 controller.
pub struct EmiClient {
    session: EmiSession,
}

impl EmiClient {
    pub fn new(session: EmiSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &EmiSession {
        &self.session
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    /// Read a batch of URIs in one request.
    ///
    /// Protocol faults (undecodable or incomplete responses) are absorbed: the
    /// returned sample maps every requested URI to `Null`. Only connection
    /// faults are returned as errors.
    pub async fn get_value<S: AsRef<str>>(&self, uris: &[S]) -> Result<Sample, EmiError> {
        let start = Local::now();
        match self.try_get_value(uris).await {
            Ok(sample) => Ok(sample),
            Err(e) if e.is_connection_fault() => Err(e),
            Err(e) => {
                warn!(device = %self.name(), error = %e, "No known parameters returned");
                Ok(Sample::unavailable(
                    self.name(),
                    uris.iter().map(|u| u.as_ref().to_string()),
                    midpoint(start, Local::now()),
                ))
            }
        }
    }

    /// Strict variant of [`get_value`](Self::get_value) that reports protocol
    /// faults instead of returning a null sample.
    pub async fn try_get_value<S: AsRef<str>>(&self, uris: &[S]) -> Result<Sample, EmiError> {
        let request = messages::get_parameter_values(uris);

        let start = Local::now();
        let response = self.session.request_response(&request).await?;
        let end = Local::now();

        let parameters = response
            .find_child("parameters")
            .ok_or_else(|| EmiError::MalformedResponse {
                element: response.name.clone(),
                detail: "missing <parameters>".to_string(),
            })?;

        let mut sample = Sample::new(self.name(), midpoint(start, end));
        for uri in uris {
            sample = sample.with_value(uri.as_ref(), SampleValue::Null);
        }
        for parameter in parameters.children.iter().filter(|c| c.name == "parameter") {
            let Some(uri) = parameter.get("uri") else {
                continue;
            };
            let value = parameter.get("parameterValue").map(str::to_string);
            sample = sample.with_value(uri, value);
        }

        debug!(device = %self.name(), values = sample.len(), "Parameter values read");
        Ok(sample)
    }

    /// Write one value. The acknowledgement is read and discarded.
    pub async fn set_value(&self, uri: &str, value: &str) -> Result<(), EmiError> {
        debug!(device = %self.name(), uri, value, "Setting parameter value");
        match self
            .session
            .request_response(&messages::set_parameter_value(uri, value))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_connection_fault() => Err(e),
            Err(e) => {
                warn!(device = %self.name(), uri, error = %e, "Set acknowledgement undecodable");
                Ok(())
            }
        }
    }

    /// Detailed properties of one parameter (the response attributes).
    pub async fn get_parameter_details(
        &self,
        uri: &str,
    ) -> Result<BTreeMap<String, String>, EmiError> {
        let response = self
            .session
            .request_response(&messages::get_parameter_details(uri))
            .await?;
        Ok(response.attributes.into_iter().collect())
    }

    /// Descriptive phrase of one parameter, as the raw response document.
    pub async fn get_parameter_text(&self, uri: &str) -> Result<String, EmiError> {
        let response = self
            .session
            .request_response(&messages::get_parameter_phrase(uri))
            .await?;
        let bytes = response.to_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Process record set between two record numbers.
    pub async fn get_process_dataset(
        &self,
        min_record: &str,
        max_record: &str,
    ) -> Result<XmlElement, EmiError> {
        self.session
            .request_response(&messages::get_record_data(min_record, max_record))
            .await
    }

    /// Machine message list. Cheap enough to double as the idle keep-alive.
    pub async fn info_log(&self) -> Result<XmlElement, EmiError> {
        self.session
            .request_response(&messages::get_messages(0))
            .await
    }
}
