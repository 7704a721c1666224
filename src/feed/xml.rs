//! ATF XML codec.
//!
//! Wire structs mirror the `atf-1.0.xsd` element layout and stay private; the
//! public surface is [`parse_feed`] / [`write_feed`] plus file helpers.
//! Documents use the ATF namespace as the default namespace (no prefix).
//!
//! The root `version` attribute is the format version and is always
//! `1.0`. Archive version labels never appear in the XML.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};

use super::{
    FeedChannel, FeedDocument, FeedItem, ImpactAssessment, ATF_FORMAT_VERSION, ATF_NAMESPACE,
};
use crate::error::{AtfError, Result};

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Serialize, Deserialize)]
struct Atf {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(rename = "@version", default)]
    version: String,
    channel: Channel,
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Channel {
    title: String,
    link: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "lastBuildDate")]
    last_build_date: String,
    #[serde(default)]
    language: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Item {
    title: String,
    link: String,
    #[serde(rename = "pubDate")]
    pub_date: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    categories: Categories,
    #[serde(rename = "impactAssessment")]
    impact: Impact,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Categories {
    #[serde(rename = "category", default)]
    category: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Impact {
    #[serde(default)]
    summary: String,
    #[serde(rename = "affectedUsers", default)]
    affected_users: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metrics: Option<Metrics>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metrics {
    #[serde(rename = "metric", default)]
    metric: Vec<Metric>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Metric {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "$text", default)]
    value: String,
}

/// Parse an ATF document. The parsed document carries the format version
/// as its version until an archive assigns a label.
pub fn parse_feed(xml: &str) -> Result<FeedDocument> {
    let wire: Atf = from_str(xml).map_err(|e| AtfError::Xml(e.to_string()))?;
    if !wire.xmlns.is_empty() && wire.xmlns != ATF_NAMESPACE {
        return Err(AtfError::InvalidDocument(format!(
            "unexpected namespace {:?}",
            wire.xmlns
        )));
    }
    if !wire.version.is_empty() && wire.version != ATF_FORMAT_VERSION {
        return Err(AtfError::InvalidDocument(format!(
            "unsupported ATF format version {:?}",
            wire.version
        )));
    }

    let channel = FeedChannel {
        last_build_date: parse_timestamp("lastBuildDate", &wire.channel.last_build_date)?,
        title: wire.channel.title,
        link: wire.channel.link,
        description: wire.channel.description,
        language: wire.channel.language,
    };

    let mut items = Vec::with_capacity(wire.items.len());
    for it in wire.items {
        let metrics: BTreeMap<String, String> = it
            .impact
            .metrics
            .map(|m| m.metric.into_iter().map(|m| (m.name, m.value)).collect())
            .unwrap_or_default();
        items.push(FeedItem {
            pub_date: parse_timestamp("pubDate", &it.pub_date)?,
            title: it.title,
            link: it.link,
            categories: it.categories.category,
            description: it.description,
            impact_assessment: ImpactAssessment {
                summary: it.impact.summary,
                affected_users: it.impact.affected_users,
                metrics,
            },
        });
    }

    Ok(FeedDocument {
        version: ATF_FORMAT_VERSION.to_string(),
        channel,
        items,
    })
}

/// Render a document as namespaced, two-space indented ATF XML.
/// `doc.version` is not written; the root carries the format version.
pub fn write_feed(doc: &FeedDocument) -> Result<String> {
    let wire = Atf {
        xmlns: ATF_NAMESPACE.to_string(),
        version: ATF_FORMAT_VERSION.to_string(),
        channel: Channel {
            title: doc.channel.title.clone(),
            link: doc.channel.link.clone(),
            description: doc.channel.description.clone(),
            last_build_date: format_timestamp(&doc.channel.last_build_date),
            language: doc.channel.language.clone(),
        },
        items: doc
            .items
            .iter()
            .map(|it| Item {
                title: it.title.clone(),
                link: it.link.clone(),
                pub_date: format_timestamp(&it.pub_date),
                description: it.description.clone(),
                categories: Categories {
                    category: it.categories.clone(),
                },
                impact: Impact {
                    summary: it.impact_assessment.summary.clone(),
                    affected_users: it.impact_assessment.affected_users.clone(),
                    metrics: (!it.impact_assessment.metrics.is_empty()).then(|| Metrics {
                        metric: it
                            .impact_assessment
                            .metrics
                            .iter()
                            .map(|(name, value)| Metric {
                                name: name.clone(),
                                value: value.clone(),
                            })
                            .collect(),
                    }),
                },
            })
            .collect(),
    };

    let mut body = String::new();
    let mut ser = quick_xml::se::Serializer::with_root(&mut body, Some("atf"))
        .map_err(|e| AtfError::Xml(e.to_string()))?;
    ser.indent(' ', 2);
    wire.serialize(ser)
        .map_err(|e| AtfError::Xml(e.to_string()))?;

    Ok(format!("{XML_DECL}\n{body}\n"))
}

pub fn read_feed_file(path: &Path) -> Result<FeedDocument> {
    let xml = std::fs::read_to_string(path)?;
    parse_feed(&xml)
}

/// `%Y-%m-%dT%H:%M:%SZ`, the form the generator and validator agree on.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AtfError::InvalidDocument(format!("{field} {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fixtures::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<atf xmlns="https://www.algorithmictransparency.gov/atf" version="1.0">
  <channel>
    <title>Corp A &amp; Partners</title>
    <link>https://corp-a.example.com/atf</link>
    <description>Algorithm change disclosures</description>
    <lastBuildDate>2024-03-20T12:00:00Z</lastBuildDate>
    <language>en-us</language>
  </channel>
  <item>
    <title>Ranking update</title>
    <link>https://corp-a.example.com/changes/1</link>
    <pubDate>2024-03-01T09:30:00+01:00</pubDate>
    <description>Improved relevance model</description>
    <categories>
      <category>Ranking Algorithm</category>
      <category>Machine Learning</category>
    </categories>
    <impactAssessment>
      <summary>Better ranking</summary>
      <affectedUsers>25%</affectedUsers>
      <metrics>
        <metric name="latency">-3%</metric>
        <metric name="accuracy">+2.5%</metric>
      </metrics>
    </impactAssessment>
  </item>
</atf>
"#;

    #[test]
    fn parses_channel_items_and_metrics() {
        let doc = parse_feed(SAMPLE).unwrap();
        assert_eq!(doc.version, "1.0");
        assert_eq!(doc.channel.title, "Corp A & Partners");
        assert_eq!(doc.items.len(), 1);
        let it = &doc.items[0];
        assert_eq!(it.categories, vec!["Ranking Algorithm", "Machine Learning"]);
        assert_eq!(format_timestamp(&it.pub_date), "2024-03-01T08:30:00Z");
        assert_eq!(it.impact_assessment.metrics.get("latency").map(String::as_str), Some("-3%"));
        assert_eq!(it.impact_assessment.metrics.len(), 2);
    }

    #[test]
    fn written_feed_parses_back_to_same_document() {
        let doc = FeedDocument::new("1.0", channel("Corp <A>"))
            .with_item(item("X", "https://x.example.com/1"))
            .with_item(item("Y", "https://x.example.com/2"));
        let xml = write_feed(&doc).unwrap();
        assert!(xml.starts_with(XML_DECL));
        assert!(xml.contains(r#"xmlns="https://www.algorithmictransparency.gov/atf""#));
        assert!(xml.contains("<lastBuildDate>2024-03-20T12:00:00Z</lastBuildDate>"));
        assert_eq!(parse_feed(&xml).unwrap(), doc);
    }

    #[test]
    fn root_version_is_always_format_version() {
        let doc = FeedDocument::new("2.3", channel("Corp A"));
        let xml = write_feed(&doc).unwrap();
        assert!(xml.contains(r#"version="1.0""#), "{xml}");
        assert!(!xml.contains("2.3"));
        assert_eq!(parse_feed(&xml).unwrap().version, ATF_FORMAT_VERSION);
    }

    #[test]
    fn other_format_versions_are_rejected() {
        let xml = SAMPLE.replace(r#"version="1.0">"#, r#"version="2.0">"#);
        assert!(matches!(parse_feed(&xml), Err(AtfError::InvalidDocument(_))));
    }

    #[test]
    fn item_without_metrics_has_empty_map() {
        let mut it = item("X", "https://x.example.com/1");
        it.impact_assessment.metrics.clear();
        let doc = FeedDocument::new("1.0", channel("Corp A")).with_item(it);
        let xml = write_feed(&doc).unwrap();
        assert!(!xml.contains("<metrics"));
        assert!(parse_feed(&xml).unwrap().items[0].impact_assessment.metrics.is_empty());
    }

    #[test]
    fn bad_timestamp_is_invalid_document() {
        let xml = SAMPLE.replace("2024-03-20T12:00:00Z", "yesterday");
        assert!(matches!(parse_feed(&xml), Err(AtfError::InvalidDocument(_))));
    }

    #[test]
    fn foreign_namespace_is_rejected() {
        let xml = SAMPLE.replace(ATF_NAMESPACE, "urn:other");
        assert!(matches!(parse_feed(&xml), Err(AtfError::InvalidDocument(_))));
    }
}
