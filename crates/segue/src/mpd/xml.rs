use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use crate::{SegueError, SegueResult};

/// A minimal owned XML element. Namespace prefixes are dropped.
#[derive(Debug, Default)]
pub(crate) struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }
}

fn utf8(bytes: &[u8]) -> SegueResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| SegueError::MpdParsing(e.to_string()))
}

fn open_element(start: &BytesStart) -> SegueResult<Element> {
    let mut element = Element {
        name: utf8(start.local_name().as_ref())?,
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.local_name().as_ref())?;
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn close_element(stack: &mut Vec<Element>, element: Element) -> SegueResult<()> {
    let parent = stack
        .last_mut()
        .ok_or_else(|| SegueError::MpdParsing("unbalanced closing tag".to_string()))?;
    parent.children.push(element);
    Ok(())
}

/// Reads `xml` into a tree and returns its document element.
pub(crate) fn parse_document(xml: &str) -> SegueResult<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // The bottom of the stack collects top level elements.
    let mut stack = vec![Element::default()];
    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(open_element(&start)?),
            Event::Empty(start) => {
                let element = open_element(&start)?;
                close_element(&mut stack, element)?;
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(SegueError::MpdParsing("unbalanced closing tag".to_string()));
                }
                if let Some(element) = stack.pop() {
                    close_element(&mut stack, element)?;
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&utf8(&data.into_inner())?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(SegueError::MpdParsing("unexpected end of document".to_string()));
    }
    stack
        .pop()
        .and_then(|root| root.children.into_iter().next())
        .ok_or_else(|| SegueError::MpdParsing("empty document".to_string()))
}
