use std::io::Write;
use std::path::Path;

use nalgebra::Vector3;

use crate::error::CcxError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<&Vertex> for Vector3<f64> {
    fn from(vertex: &Vertex) -> Self {
        Vector3::new(vertex.x, vertex.y, vertex.z)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub vertex: Vertex,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub id: usize,
    /// CalculiX element type, e.g. `C3D8` or `S8R`
    pub label: String,
    /// Indexes into `Mesh::nodes`
    pub nodes: Vec<usize>,
}

impl Element {
    pub fn kind(&self) -> Option<ElementKind> {
        ElementKind::classify(&self.label, self.nodes.len())
    }
}

/// Element shapes the quality evaluator and the VTU writer understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Triangle,
    Quad,
    Tetra,
    Hexahedron,
}

impl ElementKind {
    /// Maps a CalculiX type label and a node count onto a linear shape.
    ///
    /// Quadratic elements map onto their linear counterpart and are handled
    /// on their corner nodes only.
    pub fn classify(label: &str, node_count: usize) -> Option<ElementKind> {
        let label = label.trim().to_uppercase();

        if label.starts_with("C3D") {
            return match node_count {
                4 | 10 => Some(ElementKind::Tetra),
                8 | 20 => Some(ElementKind::Hexahedron),
                _ => None,
            };
        }

        let surface_families = ["S", "M3D", "CPS", "CPE", "CAX"];
        let is_surface = surface_families.iter().any(|family| {
            label
                .strip_prefix(family)
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| c.is_ascii_digit())
        });

        if is_surface {
            return match node_count {
                3 | 6 => Some(ElementKind::Triangle),
                4 | 8 => Some(ElementKind::Quad),
                _ => None,
            };
        }

        None
    }

    pub fn corner_count(&self) -> usize {
        match self {
            ElementKind::Triangle => 3,
            ElementKind::Quad | ElementKind::Tetra => 4,
            ElementKind::Hexahedron => 8,
        }
    }

    pub fn is_solid(&self) -> bool {
        matches!(self, ElementKind::Tetra | ElementKind::Hexahedron)
    }

    pub fn vtk_cell_type(&self) -> u8 {
        match self {
            ElementKind::Triangle => 5,
            ElementKind::Quad => 9,
            ElementKind::Tetra => 10,
            ElementKind::Hexahedron => 12,
        }
    }
}

/// The geometry of a single element, detached from the mesh.
#[derive(Debug, Clone)]
pub struct Cell {
    pub element_id: usize,
    pub label: String,
    pub points: Vec<Vector3<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
}

impl Mesh {
    /// Collects the node coordinates of every element, in element order
    pub fn cells(&self) -> Vec<Cell> {
        self.elements
            .iter()
            .map(|element| Cell {
                element_id: element.id,
                label: element.label.clone(),
                points: element
                    .nodes
                    .iter()
                    .map(|&i| Vector3::from(&self.nodes[i].vertex))
                    .collect(),
            })
            .collect()
    }
}

/// A named scalar with one value per mesh element
#[derive(Debug, Clone)]
pub struct CellField {
    pub name: String,
    pub values: Vec<f64>,
}

pub trait MeshReader {
    fn load(&self, path: &Path) -> Result<Mesh, CcxError>;
}

pub trait MeshWriter {
    fn write_mesh(
        &self,
        out: &mut dyn Write,
        mesh: &Mesh,
        fields: &[CellField],
    ) -> Result<(), CcxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_solid_elements() {
        assert_eq!(ElementKind::classify("C3D8", 8), Some(ElementKind::Hexahedron));
        assert_eq!(ElementKind::classify("c3d8r", 8), Some(ElementKind::Hexahedron));
        assert_eq!(ElementKind::classify("C3D20R", 20), Some(ElementKind::Hexahedron));
        assert_eq!(ElementKind::classify("C3D4", 4), Some(ElementKind::Tetra));
        assert_eq!(ElementKind::classify("C3D10", 10), Some(ElementKind::Tetra));
        assert_eq!(ElementKind::classify("C3D6", 6), None);
    }

    #[test]
    fn classifies_surface_elements() {
        assert_eq!(ElementKind::classify("S8R", 8), Some(ElementKind::Quad));
        assert_eq!(ElementKind::classify("S4", 4), Some(ElementKind::Quad));
        assert_eq!(ElementKind::classify("CPS3", 3), Some(ElementKind::Triangle));
        assert_eq!(ElementKind::classify("M3D6", 6), Some(ElementKind::Triangle));
        assert_eq!(ElementKind::classify("CAX4", 4), Some(ElementKind::Quad));
    }

    #[test]
    fn rejects_line_elements_and_bad_counts() {
        assert_eq!(ElementKind::classify("B31", 2), None);
        assert_eq!(ElementKind::classify("T3D2", 2), None);
        assert_eq!(ElementKind::classify("SPRINGA", 2), None);
        assert_eq!(ElementKind::classify("S4", 5), None);
        assert_eq!(ElementKind::classify("C3D8", 7), None);
    }

    #[test]
    fn cells_follow_element_order() {
        let vertex = |x: f64| Vertex { x, y: 0.0, z: 0.0 };
        let mesh = Mesh {
            nodes: vec![
                Node { id: 10, vertex: vertex(0.0) },
                Node { id: 11, vertex: vertex(1.0) },
                Node { id: 12, vertex: vertex(2.0) },
            ],
            elements: vec![
                Element { id: 2, label: "S3".to_string(), nodes: vec![2, 1, 0] },
                Element { id: 1, label: "S3".to_string(), nodes: vec![0, 1, 2] },
            ],
        };

        let cells = mesh.cells();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].element_id, 2);
        assert_eq!(cells[0].points[0].x, 2.0);
        assert_eq!(cells[1].points[0].x, 0.0);
    }
}
