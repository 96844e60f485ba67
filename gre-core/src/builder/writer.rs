use super::BuilderError;
use crate::config::BuilderOptions;
use quick_xml::{
    events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

/// Thin layer over [`quick_xml::Writer`] applying the builder options.
///
/// Codes and numbers go through [`XmlOut::leaf`] and are always escaped.
/// Free text goes through [`XmlOut::text_leaf`]: escaped when `autoescape` is on,
/// otherwise written verbatim inside a CDATA section.
pub(crate) struct XmlOut {
    writer: Writer<Vec<u8>>,
    autoescape: bool,
}

impl XmlOut {
    pub(crate) fn new(options: &BuilderOptions) -> Self {
        let writer = match options.indent() {
            Some(width) => Writer::new_with_indent(Vec::new(), b' ', width),
            None => Writer::new(Vec::new()),
        };
        Self {
            writer,
            autoescape: options.autoescape(),
        }
    }

    pub(crate) fn declaration(&mut self) -> Result<(), BuilderError> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("no"))))
    }

    pub(crate) fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), BuilderError> {
        self.event(Event::Start(start(name, attrs)))
    }

    pub(crate) fn close(&mut self, name: &str) -> Result<(), BuilderError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    pub(crate) fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), BuilderError> {
        self.event(Event::Empty(start(name, attrs)))
    }

    pub(crate) fn leaf(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        value: &str,
    ) -> Result<(), BuilderError> {
        self.open(name, attrs)?;
        self.event(Event::Text(BytesText::new(value)))?;
        self.close(name)
    }

    pub(crate) fn text_leaf(&mut self, name: &str, value: &str) -> Result<(), BuilderError> {
        self.open(name, &[])?;
        // "]]>" cannot live inside CDATA
        if self.autoescape || value.contains("]]>") {
            self.event(Event::Text(BytesText::new(value)))?;
        } else {
            self.event(Event::CData(BytesCData::new(value)))?;
        }
        self.close(name)
    }

    pub(crate) fn finish(self) -> Result<String, BuilderError> {
        String::from_utf8(self.writer.into_inner()).map_err(|e| BuilderError::Xml(e.to_string()))
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), BuilderError> {
        self.writer
            .write_event(event)
            .map_err(|e| BuilderError::Xml(e.to_string()))
    }
}

fn start<'a>(name: &'a str, attrs: &[(&'a str, &'a str)]) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    for attr in attrs {
        start.push_attribute(*attr);
    }
    start
}

/// Format a decimal with at most `max_precision` fraction digits, without trailing zeros.
pub(crate) fn decimal(value: f64, max_precision: usize) -> String {
    let formatted = format!("{value:.max_precision$}");
    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(options: &BuilderOptions, text: &str) -> String {
        let mut out = XmlOut::new(options);
        out.open("Root", &[("a", "1")]).unwrap();
        out.leaf("Code", &[], "A&B").unwrap();
        out.text_leaf("Name", text).unwrap();
        out.close("Root").unwrap();
        out.finish().unwrap()
    }

    #[test]
    fn free_text_is_cdata_without_autoescape() {
        let xml = render(&BuilderOptions::default(), "Perú & Co");
        assert_eq!(
            xml,
            "<Root a=\"1\"><Code>A&amp;B</Code><Name><![CDATA[Perú & Co]]></Name></Root>"
        );
    }

    #[test]
    fn free_text_is_escaped_with_autoescape() {
        let mut options = BuilderOptions::default();
        options.set(BuilderOptions::AUTOESCAPE, true);
        let xml = render(&options, "Perú & Co");
        assert!(xml.contains("<Name>Perú &amp; Co</Name>"));
    }

    #[test]
    fn cdata_terminator_falls_back_to_escaping() {
        let xml = render(&BuilderOptions::default(), "x]]>y");
        assert!(xml.contains("<Name>x]]&gt;y</Name>"));
    }

    #[test]
    fn indent_option_pretty_prints() {
        let mut options = BuilderOptions::default();
        options.set(BuilderOptions::INDENT, 2);
        let xml = render(&options, "n");
        assert!(xml.contains("\n  <Code>"));
    }

    #[test]
    fn decimal_trims_trailing_zeros() {
        assert_eq!(decimal(12.5, 3), "12.5");
        assert_eq!(decimal(2.0, 10), "2");
        assert_eq!(decimal(0.126, 2), "0.13");
        assert_eq!(decimal(7.0, 0), "7");
    }
}
