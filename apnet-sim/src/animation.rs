//! Topology animation file in the NetAnim XML layout.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Duration;

use apnet_core::topology::{Endpoint, Topology};

use crate::capture::{ApCapture, CaptureDirection};

/// File name of the animation artifact.
pub const ANIMATION_FILE: &str = "animation.xml";

const ANIM_VERSION: &str = "netanim-3.108";

/// Display attributes of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStyle {
    pub rgb: (u8, u8, u8),
    pub size: u32,
    pub description: &'static str,
}

impl NodeStyle {
    /// Style for an endpoint: red, larger and labelled "AP" for the access point.
    pub fn for_endpoint(endpoint: &Endpoint) -> Self {
        if endpoint.is_access_point() {
            Self {
                rgb: (255, 0, 0),
                size: 10,
                description: "AP",
            }
        } else {
            Self {
                rgb: (0, 0, 255),
                size: 1,
                description: "Client",
            }
        }
    }
}

/// Renders node placement, styling and optional AP packet records.
pub struct AnimationWriter<'a> {
    topology: &'a Topology,
    capture: Option<&'a ApCapture>,
}

impl<'a> AnimationWriter<'a> {
    /// Creates a writer for `topology`.
    pub fn new(topology: &'a Topology) -> Self {
        Self {
            topology,
            capture: None,
        }
    }

    /// Adds one packet record per captured AP frame.
    pub fn with_packets(mut self, capture: &'a ApCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Renders the document.
    pub fn render(&self) -> String {
        let mut xml = String::new();
        let _ = writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        let _ = writeln!(xml, r#"<anim ver="{ANIM_VERSION}" filetype="animation">"#);

        for endpoint in self.topology.endpoints() {
            let id = endpoint.id.0;
            let _ = writeln!(
                xml,
                r#"<node id="{id}" sysId="0" locX="{:.2}" locY="{:.2}" />"#,
                endpoint.position.x, endpoint.position.y
            );
        }

        for endpoint in self.topology.endpoints() {
            let id = endpoint.id.0;
            let style = NodeStyle::for_endpoint(endpoint);
            let (r, g, b) = style.rgb;
            let _ = writeln!(xml, r#"<nu p="c" t="0" id="{id}" r="{r}" g="{g}" b="{b}" />"#);
            let _ = writeln!(
                xml,
                r#"<nu p="d" t="0" id="{id}" descr="{}" />"#,
                style.description
            );
            let _ = writeln!(
                xml,
                r#"<nu p="s" t="0" id="{id}" w="{0}" h="{0}" />"#,
                style.size
            );
        }

        if let Some(capture) = self.capture {
            for frame in capture.frames() {
                let packet = &frame.packet;
                let tag = match frame.direction {
                    CaptureDirection::Outbound => "tx",
                    CaptureDirection::Inbound => "rx",
                };
                let _ = writeln!(
                    xml,
                    r#"<p fId="{}" tId="{}" t="{}" dir="{tag}" meta-info="{}" />"#,
                    packet.source_node.0,
                    packet.destination_node.0,
                    seconds(frame.time),
                    packet.tuple
                );
            }
        }

        let _ = writeln!(xml, "</anim>");
        xml
    }

    /// Writes the document to `path`.
    ///
    /// # Errors
    ///
    /// - `std::io::Error` - File could not be written
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.render())?;
        tracing::debug!("Wrote animation to {}", path.display());
        Ok(())
    }
}

fn seconds(time: Duration) -> String {
    format!("{:.9}", time.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_styled_by_role() {
        let topology = Topology::builder(10).ap_index(4).build().unwrap();
        let xml = AnimationWriter::new(&topology).render();

        assert_eq!(xml.matches("<node ").count(), 10);
        assert_eq!(xml.matches(r#"descr="Client""#).count(), 9);
        assert!(xml.contains(r#"<nu p="c" t="0" id="4" r="255" g="0" b="0" />"#));
        assert!(xml.contains(r#"<nu p="d" t="0" id="4" descr="AP" />"#));
        assert!(xml.contains(r#"<nu p="s" t="0" id="4" w="10" h="10" />"#));
        assert!(xml.contains(r#"<node id="4" sysId="0" locX="25.00" locY="25.00" />"#));
        assert!(xml.contains(r#"<nu p="c" t="0" id="0" r="0" g="0" b="255" />"#));
        assert!(xml.trim_end().ends_with("</anim>"));
    }

    #[test]
    fn test_render_is_stable() {
        let topology = Topology::builder(12).build().unwrap();
        let writer = AnimationWriter::new(&topology);
        assert_eq!(writer.render(), writer.render());
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let topology = Topology::builder(10).build().unwrap();
        let path = dir.path().join(ANIMATION_FILE);

        AnimationWriter::new(&topology).write(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("<?xml"));
    }
}
