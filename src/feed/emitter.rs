use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use thiserror::Error;

use super::aggregator::AggregateFeed;
use super::parser::Entry;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const GENERATOR: &str = concat!("hybridfeed ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("Failed to write Atom XML: {0}")]
    Xml(#[from] std::io::Error),

    #[error("Generated Atom feed contains invalid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), EmitError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_entry(writer: &mut Writer<Cursor<Vec<u8>>>, entry: &Entry) -> Result<(), EmitError> {
    writer.write_event(Event::Start(BytesStart::new("entry")))?;

    write_text_element(writer, "id", &entry.guid)?;
    write_text_element(writer, "title", &entry.title)?;

    if let Some(ref href) = entry.link {
        let mut link = BytesStart::new("link");
        link.push_attribute(("href", href.as_str()));
        writer.write_event(Event::Empty(link))?;
    }

    if let Some(ref published) = entry.published {
        write_text_element(writer, "published", &rfc3339(published))?;
    }
    // Atom requires <updated>; merged entries always have a sort key
    if let Some(ref updated) = entry.sort_key() {
        write_text_element(writer, "updated", &rfc3339(updated))?;
    }

    writer.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

/// Serializes a merged feed as a pretty-printed Atom 1.0 document.
///
/// Entries are written in the order they appear in `feed.entries`.
pub fn write_atom(feed: &AggregateFeed) -> Result<String, EmitError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut root = BytesStart::new("feed");
    root.push_attribute(("xmlns", ATOM_NS));
    writer.write_event(Event::Start(root))?;

    write_text_element(&mut writer, "id", &feed.id)?;
    write_text_element(&mut writer, "title", &feed.title)?;
    write_text_element(&mut writer, "updated", &rfc3339(&feed.updated))?;
    write_text_element(&mut writer, "generator", GENERATOR)?;

    for entry in &feed.entries {
        write_entry(&mut writer, entry)?;
    }

    writer.write_event(Event::End(BytesEnd::new("feed")))?;

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}
