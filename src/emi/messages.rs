//! EMI request builders
//!
//! One constructor per request kind understood by the CC300 controller.
//! Responses mirror the request names (`loginRequest` -> `loginResponse`).

use super::xml::XmlElement;

/// Client id sent with every value read.
pub const CLIENT_ID: &str = "1";

/// Unit system used for value writes and phrase lookups.
pub const UNIT_SYSTEM: &str = "iso_abs";

/// Language of messages and phrases.
pub const LANGUAGE: &str = "en";

/// Response attribute carrying the session id after a login.
pub const SESSION_ID_ATTR: &str = "sessionid";

pub fn login(username: &str, password: &str) -> XmlElement {
    XmlElement::new("loginRequest")
        .attr("username", username)
        .attr("password", password)
}

pub fn logout() -> XmlElement {
    XmlElement::new("logoutRequest")
}

/// Info-log (message list) request. Also used as the idle keep-alive probe.
pub fn get_messages(min_message_index: u32) -> XmlElement {
    XmlElement::new("getMessagesRequest")
        .attr("language", LANGUAGE)
        .attr("minMessageIndex", min_message_index.to_string())
}

/// Batched read of any number of parameters.
pub fn get_parameter_values<S: AsRef<str>>(uris: &[S]) -> XmlElement {
    let parameters = uris.iter().fold(XmlElement::new("parameters"), |acc, uri| {
        acc.child(XmlElement::new("parameter").attr("uri", uri.as_ref()))
    });
    XmlElement::new("getParameterValuesRequest")
        .attr("id", CLIENT_ID)
        .child(parameters)
}

pub fn set_parameter_value(uri: &str, value: &str) -> XmlElement {
    XmlElement::new("setParameterValueRequest")
        .attr("unitSystem", UNIT_SYSTEM)
        .attr("uri", uri)
        .attr("parameterValue", value)
}

pub fn get_parameter_details(uri: &str) -> XmlElement {
    XmlElement::new("getParameterDetailsRequest").attr("uri", uri)
}

pub fn get_parameter_phrase(uri: &str) -> XmlElement {
    XmlElement::new("getParameterPhraseRequest")
        .attr("unitSystem", UNIT_SYSTEM)
        .attr("uri", uri)
        .attr("language", LANGUAGE)
}

pub fn get_record_data(min_record: &str, max_record: &str) -> XmlElement {
    XmlElement::new("getRecordDataRequest")
        .attr("minRecordNumber", min_record)
        .attr("maxRecordNumber", max_record)
}
