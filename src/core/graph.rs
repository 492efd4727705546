// src/core/graph.rs

//! Turns stored results into visualisation structures: a node/edge graph
//! (JSON or GEXF), a type-level collapsed graph, and a parent/child tree.

use std::collections::{BTreeMap, HashMap, HashSet};
use chrono::Utc;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use serde::Serialize;
use strum::{Display, EnumString};

use crate::core::catalogue;
use crate::core::error::{ExportError, StoreError};
use crate::core::event::{EventType, ROOT_HASH};
use crate::core::store::{ResultRow, ScanDb};

const ROOT_COLOUR: &str = "#f00";
const NODE_COLOUR: &str = "#000";

/// Value-level graph: one node per distinct value, one edge per distinct
/// source value → value pair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GraphData {
    /// `(value, event type)` in first-seen order.
    pub nodes: Vec<(String, String)>,
    /// Indexes into `nodes`.
    pub edges: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub group: String,
    pub color: String,
    pub root: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphJson {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeNode {
    pub id: String,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeEdge {
    pub source: String,
    pub target: String,
    pub count: usize,
}

/// Results grouped by event type for the collapsed view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollapsedGraph {
    pub nodes: Vec<TypeNode>,
    pub edges: Vec<TypeEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// Tree of event hashes plus the rows needed to label them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeDiscovery {
    pub tree: Vec<TreeNode>,
    pub data: BTreeMap<String, ResultRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Tree,
    Gexf,
}

/// Builds the value graph. Rows from several scans may be mixed; nodes are
/// unioned by value and edges deduplicated. Raw data and self-loops are left
/// out.
pub fn build_graph_data(rows: &[ResultRow]) -> GraphData {
    let mut graph = GraphData::default();
    let mut ids: HashMap<String, usize> = HashMap::new();
    let mut seen_edges = HashSet::new();

    let mut node = |graph: &mut GraphData, value: &str, group: &str| -> usize {
        if let Some(&id) = ids.get(value) {
            return id;
        }
        let id = graph.nodes.len();
        graph.nodes.push((value.to_string(), group.to_string()));
        ids.insert(value.to_string(), id);
        id
    };

    for row in rows {
        if catalogue::detail(&row.event.event_type).raw {
            continue;
        }
        let source_group = row
            .source_type
            .as_ref()
            .map(EventType::to_string)
            .unwrap_or_else(|| EventType::Root.to_string());
        let from = node(&mut graph, &row.source_data, &source_group);
        let to = node(&mut graph, &row.event.data, row.event.event_type.as_str());
        if from != to && seen_edges.insert((from, to)) {
            graph.edges.push((from, to));
        }
    }
    graph
}

/// Node/edge JSON structure; nodes whose value is one of `roots` are marked.
pub fn build_graph_json(roots: &[String], rows: &[ResultRow]) -> GraphJson {
    let data = build_graph_data(rows);
    let nodes = data
        .nodes
        .iter()
        .enumerate()
        .map(|(id, (value, group))| {
            let root = roots.contains(value);
            GraphNode {
                id: id.to_string(),
                label: value.clone(),
                group: group.clone(),
                color: if root { ROOT_COLOUR } else { NODE_COLOUR }.to_string(),
                root,
            }
        })
        .collect();
    let edges = data
        .edges
        .iter()
        .enumerate()
        .map(|(id, (from, to))| GraphEdge {
            id: id.to_string(),
            source: from.to_string(),
            target: to.to_string(),
        })
        .collect();
    GraphJson { nodes, edges }
}

/// One node per event type with counts, edges between the types of parents
/// and children. The root type is left out.
pub fn collapse_by_type(rows: &[ResultRow]) -> CollapsedGraph {
    let mut counts: BTreeMap<&EventType, usize> = BTreeMap::new();
    let mut links: BTreeMap<(&EventType, &EventType), usize> = BTreeMap::new();
    for row in rows {
        *counts.entry(&row.event.event_type).or_default() += 1;
        if let Some(source) = row.source_type.as_ref().filter(|t| **t != EventType::Root) {
            if *source != row.event.event_type {
                *links.entry((source, &row.event.event_type)).or_default() += 1;
            }
        }
    }
    CollapsedGraph {
        nodes: counts
            .into_iter()
            .map(|(t, count)| TypeNode {
                id: t.to_string(),
                label: catalogue::describe(t).to_string(),
                count,
            })
            .collect(),
        edges: links
            .into_iter()
            .map(|((s, t), count)| TypeEdge {
                source: s.to_string(),
                target: t.to_string(),
                count,
            })
            .collect(),
    }
}

type XmlResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// GEXF 1.2 document of the value graph.
pub fn build_graph_gexf(roots: &[String], title: &str, rows: &[ResultRow]) -> Result<String, ExportError> {
    let data = build_graph_data(rows);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_gexf(&mut writer, roots, title, &data).map_err(|e| ExportError::Gexf(e.to_string()))?;
    String::from_utf8(writer.into_inner()).map_err(|e| ExportError::Gexf(e.to_string()))
}

fn write_gexf(writer: &mut Writer<Vec<u8>>, roots: &[String], title: &str, data: &GraphData) -> XmlResult {
    let modified = Utc::now().format("%Y-%m-%d").to_string();

    writer.write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(XmlEvent::Start(BytesStart::new("gexf").with_attributes([
        ("xmlns", "http://www.gexf.net/1.2draft"),
        ("xmlns:viz", "http://www.gexf.net/1.2draft/viz"),
        ("version", "1.2"),
    ])))?;

    writer.write_event(XmlEvent::Start(
        BytesStart::new("meta").with_attributes([("lastmodifieddate", modified.as_str())]),
    ))?;
    text_element(writer, "creator", env!("CARGO_PKG_NAME"))?;
    text_element(writer, "description", title)?;
    writer.write_event(XmlEvent::End(BytesEnd::new("meta")))?;

    writer.write_event(XmlEvent::Start(
        BytesStart::new("graph").with_attributes([("defaultedgetype", "directed"), ("mode", "static")]),
    ))?;
    writer.write_event(XmlEvent::Start(BytesStart::new("attributes").with_attributes([("class", "node")])))?;
    writer.write_event(XmlEvent::Empty(BytesStart::new("attribute").with_attributes([
        ("id", "0"),
        ("title", "type"),
        ("type", "string"),
    ])))?;
    writer.write_event(XmlEvent::End(BytesEnd::new("attributes")))?;

    writer.write_event(XmlEvent::Start(BytesStart::new("nodes")))?;
    for (id, (value, group)) in data.nodes.iter().enumerate() {
        let id = id.to_string();
        writer.write_event(XmlEvent::Start(
            BytesStart::new("node").with_attributes([("id", id.as_str()), ("label", value.as_str())]),
        ))?;
        writer.write_event(XmlEvent::Start(BytesStart::new("attvalues")))?;
        writer.write_event(XmlEvent::Empty(
            BytesStart::new("attvalue").with_attributes([("for", "0"), ("value", group.as_str())]),
        ))?;
        writer.write_event(XmlEvent::End(BytesEnd::new("attvalues")))?;
        if roots.contains(value) {
            writer.write_event(XmlEvent::Empty(
                BytesStart::new("viz:color").with_attributes([("r", "255"), ("g", "0"), ("b", "0")]),
            ))?;
        }
        writer.write_event(XmlEvent::End(BytesEnd::new("node")))?;
    }
    writer.write_event(XmlEvent::End(BytesEnd::new("nodes")))?;

    writer.write_event(XmlEvent::Start(BytesStart::new("edges")))?;
    for (id, (from, to)) in data.edges.iter().enumerate() {
        let (id, from, to) = (id.to_string(), from.to_string(), to.to_string());
        writer.write_event(XmlEvent::Empty(BytesStart::new("edge").with_attributes([
            ("id", id.as_str()),
            ("source", from.as_str()),
            ("target", to.as_str()),
        ])))?;
    }
    writer.write_event(XmlEvent::End(BytesEnd::new("edges")))?;

    writer.write_event(XmlEvent::End(BytesEnd::new("graph")))?;
    writer.write_event(XmlEvent::End(BytesEnd::new("gexf")))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> XmlResult {
    writer.write_event(XmlEvent::Start(BytesStart::new(name)))?;
    writer.write_event(XmlEvent::Text(BytesText::new(text)))?;
    writer.write_event(XmlEvent::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Converts a parent → children map into nested trees, one per key that is
/// nobody's child.
pub fn data_parent_child_to_tree(parent_child: &BTreeMap<String, Vec<String>>) -> Vec<TreeNode> {
    let children: HashSet<&str> = parent_child
        .values()
        .flatten()
        .map(String::as_str)
        .collect();
    parent_child
        .keys()
        .filter(|k| !children.contains(k.as_str()))
        .map(|k| {
            let mut visited = HashSet::new();
            subtree(k, parent_child, &mut visited)
        })
        .collect()
}

fn subtree<'a>(
    name: &'a str,
    parent_child: &'a BTreeMap<String, Vec<String>>,
    visited: &mut HashSet<&'a str>,
) -> TreeNode {
    visited.insert(name);
    let children = parent_child
        .get(name)
        .into_iter()
        .flatten()
        .filter_map(|child| {
            if visited.contains(child.as_str()) {
                None
            } else {
                Some(subtree(child, parent_child, visited))
            }
        })
        .collect();
    TreeNode {
        name: name.to_string(),
        children,
    }
}

/// Provenance tree of every (non false-positive) result of one type, or of
/// all results when `event_type` is `None`. The root is not part of the tree.
pub async fn element_type_discovery(
    db: &ScanDb,
    scan_id: &str,
    event_type: Option<&EventType>,
) -> Result<TypeDiscovery, StoreError> {
    let rows = db.scan_result_event(scan_id, event_type, true).await?;
    let ids: Vec<String> = rows.iter().map(|r| r.event.hash.clone()).collect();
    let mut sources = db.sources_of(scan_id, &ids).await?;
    sources.parent_child.remove(ROOT_HASH);
    Ok(TypeDiscovery {
        tree: data_parent_child_to_tree(&sources.parent_child),
        data: sources.data,
    })
}

#[derive(Serialize)]
struct ScanTree {
    scan_id: String,
    target: String,
    #[serde(flatten)]
    discovery: TypeDiscovery,
}

/// Exports one or more scans, leaving out false positives.
pub async fn export_scans(db: &ScanDb, scan_ids: &[String], format: ExportFormat) -> Result<String, ExportError> {
    let mut roots = Vec::new();
    let mut rows = Vec::new();
    let mut trees = Vec::new();
    for id in scan_ids {
        let instance = db.scan_instance_get(id).await?;
        match format {
            ExportFormat::Tree => trees.push(ScanTree {
                scan_id: id.clone(),
                target: instance.target.clone(),
                discovery: element_type_discovery(db, id, None).await?,
            }),
            ExportFormat::Json | ExportFormat::Gexf => {
                rows.extend(db.scan_result_event(id, None, true).await?);
            }
        }
        roots.push(instance.target);
    }

    Ok(match format {
        ExportFormat::Json => serde_json::to_string_pretty(&build_graph_json(&roots, &rows))?,
        ExportFormat::Tree => serde_json::to_string_pretty(&trees)?,
        ExportFormat::Gexf => build_graph_gexf(&roots, &roots.join(", "), &rows)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::Event;

    fn row(event: Event, source: &Event) -> ResultRow {
        ResultRow {
            event,
            source_data: source.data.clone(),
            source_type: Some(source.event_type.clone()),
        }
    }

    fn sample() -> Vec<ResultRow> {
        let root = Event::root("example.com");
        let seed = Event::new(EventType::InternetName, "example.com", "seed", &root);
        let ip = Event::new(EventType::IpAddress, "192.0.2.1", "dns", &seed);
        let bad = Event::new(EventType::MaliciousIpaddr, "VoIPBL [192.0.2.1]", "voipbl", &ip);
        let raw = Event::new(EventType::RawRirData, "{}", "voipbl", &ip);
        vec![
            row(seed.clone(), &root),
            row(ip.clone(), &seed),
            row(bad, &ip),
            row(raw, &ip),
        ]
    }

    #[test]
    fn graph_skips_self_loops_and_raw_data() {
        let g = build_graph_data(&sample());
        assert_eq!(g.nodes.len(), 3);
        assert_eq!(g.edges, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn merged_scans_share_nodes_and_edges() {
        let mut rows = sample();
        rows.extend(sample());
        let json = build_graph_json(&["example.com".to_string()], &rows);
        assert_eq!(json.nodes.len(), 3);
        assert_eq!(json.edges.len(), 2);
        assert!(json.nodes[0].root);
        assert_eq!(json.nodes[0].color, ROOT_COLOUR);
        assert_eq!(json.nodes[1].group, "IP_ADDRESS");
    }

    #[test]
    fn collapsed_graph_counts_types() {
        let c = collapse_by_type(&sample());
        assert_eq!(c.nodes.len(), 4);
        assert!(c.edges.iter().all(|e| e.source != "ROOT"));
        let ip_to_bad = c
            .edges
            .iter()
            .find(|e| e.source == "IP_ADDRESS" && e.target == "MALICIOUS_IPADDR")
            .unwrap();
        assert_eq!(ip_to_bad.count, 1);
    }

    #[test]
    fn gexf_is_escaped() {
        let root = Event::root("a&b");
        let child = Event::new(EventType::InternetName, "<x>", "dns", &root);
        let doc = build_graph_gexf(&["a&b".to_string()], "t&", &[row(child, &root)]).unwrap();
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains(r#"label="a&amp;b""#));
        assert!(doc.contains(r#"label="&lt;x&gt;""#));
        assert!(doc.contains("<description>t&amp;</description>"));
        assert!(doc.contains(r#"<edge id="0" source="0" target="1"/>"#));
        assert_eq!(doc.matches("<viz:color").count(), 1);
    }

    #[test]
    fn gexf_reads_back_as_xml() {
        let doc = build_graph_gexf(&["example.com".to_string()], "example.com", &sample()).unwrap();
        let mut reader = quick_xml::Reader::from_str(&doc);
        let (mut nodes, mut edges) = (0, 0);
        loop {
            match reader.read_event().unwrap() {
                XmlEvent::Start(e) if e.name().as_ref() == b"node" => nodes += 1,
                XmlEvent::Empty(e) if e.name().as_ref() == b"edge" => edges += 1,
                XmlEvent::Eof => break,
                _ => {}
            }
        }
        assert_eq!((nodes, edges), (3, 2));
    }

    #[test]
    fn tree_follows_parent_child_map() {
        let mut pc = BTreeMap::new();
        pc.insert("a".to_string(), vec!["b".to_string()]);
        pc.insert("b".to_string(), vec!["c".to_string()]);
        let tree = data_parent_child_to_tree(&pc);
        assert_eq!(
            tree,
            vec![TreeNode {
                name: "a".into(),
                children: vec![TreeNode {
                    name: "b".into(),
                    children: vec![TreeNode {
                        name: "c".into(),
                        children: vec![]
                    }]
                }]
            }]
        );
    }

    #[test]
    fn export_format_parses() {
        assert_eq!("gexf".parse::<ExportFormat>().unwrap(), ExportFormat::Gexf);
        assert!("csv".parse::<ExportFormat>().is_err());
    }
}
