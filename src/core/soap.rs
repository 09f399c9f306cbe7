//! SOAP 1.1 document/literal envelopes for the remote EHR service.

use crate::domain::model::{Credentials, Record};
use crate::utils::error::{Result, SyncError};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SERVICE_NS: &str = "http://www.kareo.com/api/schemas/";

/// `SOAPAction` header value for a remote method.
pub fn soap_action(method: &str) -> String {
    format!("{}KareoServices/{}", SERVICE_NS, method)
}

/// One element of a request body. Leaf elements carry text.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    name: String,
    text: Option<String>,
    children: Vec<Element>,
}

impl Element {
    pub fn leaf(name: &str, text: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    pub fn parent(name: &str, children: Vec<Element>) -> Self {
        Self {
            name: name.to_string(),
            text: None,
            children,
        }
    }

    fn render(&self, out: &mut String) {
        if self.text.is_none() && self.children.is_empty() {
            out.push_str(&format!("<sch:{}/>", self.name));
            return;
        }

        out.push_str(&format!("<sch:{}>", self.name));
        if let Some(text) = &self.text {
            out.push_str(&escape(text.as_str()));
        }
        for child in &self.children {
            child.render(out);
        }
        out.push_str(&format!("</sch:{}>", self.name));
    }
}

/// 建立完整的 SOAP 請求，每個請求都帶 RequestHeader
pub fn build_envelope(method: &str, credentials: &Credentials, body: &[Element]) -> String {
    let header = Element::parent(
        "RequestHeader",
        vec![
            Element::leaf("CustomerKey", credentials.customer_key()),
            Element::leaf("Password", credentials.password()),
            Element::leaf("User", credentials.username()),
        ],
    );

    let mut request = String::new();
    header.render(&mut request);
    for element in body {
        element.render(&mut request);
    }

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:soap="{env}" xmlns:sch="{ns}">"#,
            "<soap:Header/>",
            "<soap:Body><sch:{method}><sch:request>{request}</sch:request></sch:{method}></soap:Body>",
            "</soap:Envelope>"
        ),
        env = SOAP_ENV_NS,
        ns = SERVICE_NS,
        method = method,
        request = request,
    )
}

/// Namespace-free view of a parsed response element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// First descendant (depth-first) with the given local name.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants with the given local name, not descending into matches.
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            } else {
                child.find_all(name, out);
            }
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

pub fn parse_document(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![XmlElement::new("#document".to_string())];

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(XmlElement::new(name));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlElement::new(name));
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::End(_) => close_element(&mut stack),
            Event::Eof => break,
            _ => {}
        }
    }

    // 未閉合的標籤代表回應被截斷，不能當成完整的資料集
    if stack.len() > 1 {
        let open = stack.last().map(|e| e.name.as_str()).unwrap_or_default();
        return Err(SyncError::connection(format!(
            "Truncated response: <{}> was never closed",
            open
        )));
    }

    stack
        .pop()
        .ok_or_else(|| SyncError::remote_fault("Empty response document"))
}

fn close_element(stack: &mut Vec<XmlElement>) {
    if stack.len() < 2 {
        return;
    }
    if let Some(element) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(element);
        }
    }
}

/// Raises the error carried by the envelope, if any.
///
/// Checked in order: SOAP fault, security block, application error block.
pub fn check_envelope(doc: &XmlElement) -> Result<()> {
    if let Some(fault) = doc.find("Fault") {
        let message = fault
            .child_text("faultstring")
            .or_else(|| fault.find("Text").map(|t| t.text.as_str()))
            .filter(|s| !s.is_empty())
            .unwrap_or("Unspecified SOAP fault");
        return Err(SyncError::remote_fault(message));
    }

    if let Some(security) = doc.find("SecurityResponse") {
        let denied = |field: &str| {
            security
                .child_text(field)
                .map(|v| v.eq_ignore_ascii_case("false"))
                .unwrap_or(false)
        };
        if denied("Authenticated") || denied("Authorized") || denied("SecurityResultSuccess") {
            let message = security
                .child_text("SecurityResult")
                .filter(|s| !s.is_empty())
                .unwrap_or("Credentials were not accepted");
            return Err(SyncError::auth(message));
        }
    }

    if let Some(error) = doc.find("ErrorResponse") {
        let is_error = error
            .child_text("IsError")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if is_error {
            let message = error
                .child_text("ErrorMessage")
                .filter(|s| !s.is_empty())
                .unwrap_or("Remote service reported an error");
            return Err(SyncError::remote_fault(message));
        }
    }

    Ok(())
}

/// Flattens every `record_tag` element into a [`Record`].
pub fn extract_records(doc: &XmlElement, record_tag: &str) -> Vec<Record> {
    let mut elements = Vec::new();
    doc.find_all(record_tag, &mut elements);
    elements.into_iter().map(flatten).collect()
}

/// 直接子節點優先；巢狀欄位同時以 `Parent.Child` 及裸名稱（若尚未出現）存入
fn flatten(element: &XmlElement) -> Record {
    let mut record = Record::new();

    for child in element.children.iter().filter(|c| c.is_leaf()) {
        record
            .data
            .entry(child.name.clone())
            .or_insert_with(|| serde_json::Value::String(child.text.clone()));
    }

    for child in element.children.iter().filter(|c| !c.is_leaf()) {
        flatten_nested(child, &child.name, &mut record);
    }

    record
}

fn flatten_nested(element: &XmlElement, prefix: &str, record: &mut Record) {
    for child in &element.children {
        let path = format!("{}.{}", prefix, child.name);
        if child.is_leaf() {
            let value = serde_json::Value::String(child.text.clone());
            record.data.entry(path).or_insert_with(|| value.clone());
            record.data.entry(child.name.clone()).or_insert(value);
        } else {
            flatten_nested(child, &path, record);
        }
    }
}
