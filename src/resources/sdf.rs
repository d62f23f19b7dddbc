//! Scene-description (SDF) parsing.
//!
//! Only the part of the dialect needed for assembly is read:
//! `model/pose`, `link/pose` and, per `visual`, its name, pose and the
//! `geometry/mesh` uri and scale. Elements are matched by local name, so
//! namespace prefixes do not matter. Malformed numbers fall back to
//! defaults; only a document that cannot be tokenized is an error.

use quick_xml::{Reader, events::Event};

use crate::{data_structures::transform::Transform, error::DescriptorError};

/// Position and extrinsic roll/pitch/yaw (radians) of an SDF `pose`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Pose {
    pub position: [f32; 3],
    pub rpy: [f32; 3],
}

impl Pose {
    /// Parses `x y z roll pitch yaw`. Anything but six finite numbers is the
    /// zero pose.
    pub fn parse(text: &str) -> Self {
        match parse_numbers::<6>(text) {
            Some([x, y, z, roll, pitch, yaw]) => Self {
                position: [x, y, z],
                rpy: [roll, pitch, yaw],
            },
            None => Self::default(),
        }
    }

    pub fn to_transform(&self) -> Transform {
        Transform::from_pose(self.position, self.rpy)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisualDescriptor {
    pub name: String,
    /// Cleaned mesh path, relative to the package root.
    pub mesh_reference: String,
    /// Pose of the visual relative to its link.
    pub pose: Pose,
    pub scale: [f32; 3],
    /// Pose of the enclosing link relative to the model.
    pub link_pose: Pose,
    pub model_pose: Pose,
}

impl VisualDescriptor {
    /// Node transform of the visual: model × link × visual, with the mesh
    /// scale applied last.
    pub fn placement(&self) -> Transform {
        let placed = self.model_pose.to_transform()
            * self.link_pose.to_transform()
            * self.pose.to_transform();
        placed.with_scale(self.scale)
    }

    /// Last path segment of the mesh reference.
    pub fn file_name(&self) -> &str {
        file_name(&self.mesh_reference)
    }
}

pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Strips `scheme://firstSegment/` from a mesh uri.
///
/// `model://robot/meshes/a.stl` becomes `meshes/a.stl`. Uris without a
/// scheme, or without anything after the first segment, come back trimmed
/// but otherwise unchanged.
pub fn clean_uri(uri: &str) -> String {
    let uri = uri.trim();
    match uri.split_once("://") {
        Some((_, rest)) => match rest.split_once('/') {
            Some((_, path)) if !path.is_empty() => path.to_string(),
            _ => uri.to_string(),
        },
        None => uri.to_string(),
    }
}

fn parse_numbers<const N: usize>(text: &str) -> Option<[f32; N]> {
    let mut out = [0.0; N];
    let mut tokens = text.split_whitespace();
    for slot in out.iter_mut() {
        let value: f32 = tokens.next()?.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        *slot = value;
    }
    match tokens.next() {
        Some(_) => None,
        None => Some(out),
    }
}

#[derive(Default)]
struct OpenVisual {
    name: Option<String>,
    index: usize,
    has_mesh: bool,
    pose: Option<String>,
    uri: Option<String>,
    scale: Option<String>,
}

#[derive(Default)]
struct OpenLink {
    index: usize,
    visual_count: usize,
    pose: Option<String>,
    descriptors: Vec<VisualDescriptor>,
}

#[derive(Default)]
struct ParseState {
    path: Vec<String>,
    model_pose: Option<String>,
    model_pose_closed: bool,
    link_count: usize,
    link: Option<OpenLink>,
    visual: Option<OpenVisual>,
    descriptors: Vec<VisualDescriptor>,
}

impl ParseState {
    fn at(&self, suffix: &[&str]) -> bool {
        self.path.len() >= suffix.len()
            && self.path[self.path.len() - suffix.len()..]
                .iter()
                .zip(suffix)
                .all(|(a, b)| a == b)
    }

    fn open(&mut self, name: &str, name_attr: Option<String>) {
        match name {
            "link" if self.link.is_none() => {
                self.link = Some(OpenLink {
                    index: self.link_count,
                    ..Default::default()
                });
                self.link_count += 1;
            }
            "visual" if self.visual.is_none() => {
                if let Some(link) = self.link.as_mut() {
                    self.visual = Some(OpenVisual {
                        name: name_attr,
                        index: link.visual_count,
                        ..Default::default()
                    });
                    link.visual_count += 1;
                }
            }
            "mesh" if self.at(&["visual", "geometry"]) => {
                if let Some(visual) = self.visual.as_mut() {
                    visual.has_mesh = true;
                }
            }
            _ => {}
        }
        self.path.push(name.to_string());
    }

    fn text(&mut self, text: &str) {
        let target = if self.at(&["model", "pose"]) && self.link.is_none() && !self.model_pose_closed {
            Some(&mut self.model_pose)
        } else if self.at(&["link", "pose"]) {
            self.link.as_mut().map(|link| &mut link.pose)
        } else if self.at(&["visual", "pose"]) {
            self.visual.as_mut().map(|visual| &mut visual.pose)
        } else if self.at(&["visual", "geometry", "mesh", "uri"]) {
            self.visual.as_mut().map(|visual| &mut visual.uri)
        } else if self.at(&["visual", "geometry", "mesh", "scale"]) {
            self.visual.as_mut().map(|visual| &mut visual.scale)
        } else {
            None
        };
        if let Some(slot) = target {
            slot.get_or_insert_with(String::new).push_str(text);
        }
    }

    fn close(&mut self) {
        let Some(name) = self.path.pop() else {
            return;
        };
        match name.as_str() {
            // a nested element of the same name is not the one being closed
            "visual" if !self.path.iter().any(|n| n == "visual") => self.close_visual(),
            "link" if !self.path.iter().any(|n| n == "link") => self.close_link(),
            "pose" if self.at(&["model"]) && self.link.is_none() => {
                self.model_pose_closed = true;
            }
            _ => {}
        }
    }

    fn close_visual(&mut self) {
        let (Some(visual), Some(link)) = (self.visual.take(), self.link.as_mut()) else {
            return;
        };
        if !visual.has_mesh {
            log::debug!("skipping visual {} of link {} without a mesh", visual.index, link.index);
            return;
        }
        link.descriptors.push(VisualDescriptor {
            name: visual
                .name
                .unwrap_or_else(|| format!("visual_{}_{}", link.index, visual.index)),
            mesh_reference: clean_uri(visual.uri.as_deref().unwrap_or_default()),
            pose: visual.pose.as_deref().map(Pose::parse).unwrap_or_default(),
            scale: visual
                .scale
                .as_deref()
                .and_then(parse_numbers::<3>)
                .unwrap_or([1.0, 1.0, 1.0]),
            link_pose: Pose::default(),
            model_pose: Pose::default(),
        });
    }

    fn close_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        // link pose may follow its visuals in the document
        let link_pose = link.pose.as_deref().map(Pose::parse).unwrap_or_default();
        self.descriptors
            .extend(link.descriptors.into_iter().map(|mut descriptor| {
                descriptor.link_pose = link_pose;
                descriptor
            }));
    }
}

/// Stateless parser handle, owned by the extractor.
#[derive(Clone, Copy, Debug, Default)]
pub struct SceneDescriptionParser;

impl SceneDescriptionParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, document: &str) -> Result<Vec<VisualDescriptor>, DescriptorError> {
        parse(document)
    }
}

/// Parses a scene description into its visuals, in document order.
pub fn parse(document: &str) -> Result<Vec<VisualDescriptor>, DescriptorError> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(true);

    let mut state = ParseState::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let name_attr = name_attribute(&e)?;
                state.open(&name, name_attr);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let name_attr = name_attribute(&e)?;
                state.open(&name, name_attr);
                state.close();
            }
            Event::End(_) => state.close(),
            Event::Text(t) => state.text(&t.unescape()?),
            Event::CData(t) => state.text(&String::from_utf8_lossy(&t)),
            Event::Eof => break,
            _ => {}
        }
    }
    if let Some(unclosed) = state.path.last() {
        return Err(DescriptorError::Unclosed(unclosed.clone()));
    }

    let model_pose = state.model_pose.as_deref().map(Pose::parse).unwrap_or_default();
    let descriptors: Vec<_> = state
        .descriptors
        .into_iter()
        .map(|mut descriptor| {
            descriptor.model_pose = model_pose;
            descriptor
        })
        .collect();
    log::debug!("scene description lists {} visuals", descriptors.len());
    Ok(descriptors)
}

fn name_attribute(
    e: &quick_xml::events::BytesStart,
) -> Result<Option<String>, DescriptorError> {
    match e.try_get_attribute("name")? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}
