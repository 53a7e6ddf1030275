//! Per-element mesh quality metrics.
//!
//! Every cell is evaluated on its corner nodes alone:
//!
//! * aspect ratio: longest edge over shortest edge
//! * skew: equiangle skewness of the face corner angles, 0 for a regular element
//! * warping: distance of quadrilateral face corners from their mean plane,
//!   relative to the mean edge length of the face
//! * scaled Jacobian: Jacobian determinant over the product of the edge lengths
//!   at each corner (and the centroid of hexahedra), minimum over those points
//!
//! Degenerate cells (coincident corners, vanishing area or volume, butterfly
//! faces) carry `NaN` in all four metrics.

use indicatif::ProgressBar;
use log::{info, warn};
use nalgebra::{Matrix3, Vector3};

use crate::{
    config::Thresholds,
    datatypes::{Cell, CellField, ElementKind},
    error::CcxError,
};

type Point = Vector3<f64>;

/// Relative tolerance for coincident corners and vanishing size
pub const DEGENERACY_TOLERANCE: f64 = 1e-10;

/// Metric names, in CSV column and VTU field order
pub const METRIC_NAMES: [&str; 4] = ["aspect_ratio", "skew", "warping", "scaled_jacobian"];

const TRIANGLE_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];
const QUAD_EDGES: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];
const TETRA_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]];
const HEX_EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

static TRIANGLE_FACES: [[usize; 3]; 1] = [[0, 1, 2]];
static TETRA_FACES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [1, 2, 3], [0, 2, 3]];
static QUAD_FACES: [[usize; 4]; 1] = [[0, 1, 2, 3]];
static HEX_FACES: [[usize; 4]; 6] = [
    [0, 1, 2, 3],
    [4, 5, 6, 7],
    [0, 1, 5, 4],
    [1, 2, 6, 5],
    [2, 3, 7, 6],
    [3, 0, 4, 7],
];

/// Edge neighbours of each hexahedron corner. A right-handed element has a
/// positive determinant at every corner.
const HEX_CORNER_NEIGHBOURS: [[usize; 3]; 8] = [
    [1, 3, 4],
    [2, 0, 5],
    [3, 1, 6],
    [0, 2, 7],
    [7, 5, 0],
    [4, 6, 1],
    [5, 7, 2],
    [6, 4, 3],
];

const HEX_NATURAL_COORDS: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityMetrics {
    pub aspect_ratio: f64,
    pub skew: f64,
    pub warping: f64,
    pub scaled_jacobian: f64,
    /// Signed area of surface elements, signed volume of solids
    pub size: f64,
    pub degenerate: bool,
}

impl QualityMetrics {
    fn degenerate(size: f64) -> QualityMetrics {
        QualityMetrics {
            aspect_ratio: f64::NAN,
            skew: f64::NAN,
            warping: f64::NAN,
            scaled_jacobian: f64::NAN,
            size,
            degenerate: true,
        }
    }

    /// Metric values in `METRIC_NAMES` order
    pub fn values(&self) -> [f64; 4] {
        [
            self.aspect_ratio,
            self.skew,
            self.warping,
            self.scaled_jacobian,
        ]
    }
}

#[derive(Debug)]
pub struct CellQuality {
    pub index: usize,
    pub element_id: usize,
    pub label: String,
    pub outcome: Result<QualityMetrics, CcxError>,
}

#[derive(Debug)]
pub struct QualityReport {
    pub cells: Vec<CellQuality>,
}

/// An evaluated element that crossed one or more thresholds
#[derive(Debug)]
pub struct Problem {
    pub element_id: usize,
    pub label: String,
    pub issues: Vec<String>,
}

impl QualityReport {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn evaluated_count(&self) -> usize {
        self.cells.iter().filter(|c| c.outcome.is_ok()).count()
    }

    /// One field per metric with a value for every cell. Cells that could
    /// not be evaluated get `NaN`.
    pub fn fields(&self) -> Vec<CellField> {
        METRIC_NAMES
            .iter()
            .enumerate()
            .map(|(m, name)| CellField {
                name: name.to_string(),
                values: self
                    .cells
                    .iter()
                    .map(|cell| match &cell.outcome {
                        Ok(metrics) => metrics.values()[m],
                        Err(_) => f64::NAN,
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn problems(&self, thresholds: &Thresholds) -> Vec<Problem> {
        let mut problems = Vec::new();

        for cell in &self.cells {
            let metrics = match &cell.outcome {
                Ok(m) => m,
                Err(_) => continue,
            };

            let mut issues = Vec::new();
            if metrics.degenerate {
                issues.push("Degenerate geometry".to_string());
            }
            if metrics.aspect_ratio > thresholds.max_aspect_ratio {
                issues.push(format!("High aspect ratio: {:.4}", metrics.aspect_ratio));
            }
            if metrics.size.abs() < thresholds.min_size {
                issues.push(format!("Near-zero area/volume: {:.4e}", metrics.size));
            }
            if metrics.scaled_jacobian <= thresholds.min_scaled_jacobian {
                issues.push(format!(
                    "Nonpositive scaled Jacobian: {:.4}",
                    metrics.scaled_jacobian
                ));
            }

            if !issues.is_empty() {
                problems.push(Problem {
                    element_id: cell.element_id,
                    label: cell.label.clone(),
                    issues,
                });
            }
        }

        problems
    }

    /// Logs unsupported cells, problem elements and a one-line summary
    pub fn log_summary(&self, thresholds: &Thresholds) {
        if self.is_empty() {
            info!("no cells to evaluate");
            return;
        }

        for cell in &self.cells {
            if let Err(err) = &cell.outcome {
                warn!("element {}: {err}", cell.element_id);
            }
        }

        let problems = self.problems(thresholds);
        for problem in &problems {
            warn!(
                "element {} ({}): {}",
                problem.element_id,
                problem.label,
                problem.issues.join(", ")
            );
        }

        let degenerate = self
            .cells
            .iter()
            .filter(|c| matches!(&c.outcome, Ok(m) if m.degenerate))
            .count();

        info!(
            "evaluated {} of {} cells: {} degenerate, {} with problems",
            self.evaluated_count(),
            self.len(),
            degenerate,
            problems.len()
        );
    }
}

/// Evaluates every cell of a mesh
///
/// # Arguments
/// * `cells` - The cells to evaluate, in mesh order
///
/// # Returns
/// A report with one entry per cell in the same order. Fails only when no
/// cell has a supported element kind.
pub fn evaluate(cells: &[Cell]) -> Result<QualityReport, CcxError> {
    info!("evaluating quality of {} cells...", cells.len());

    let bar = ProgressBar::new(cells.len() as u64);
    let mut entries = Vec::with_capacity(cells.len());
    for (index, cell) in cells.iter().enumerate() {
        entries.push(CellQuality {
            index,
            element_id: cell.element_id,
            label: cell.label.clone(),
            outcome: evaluate_cell(cell),
        });
        bar.inc(1);
    }
    bar.finish_and_clear();

    let report = QualityReport { cells: entries };
    if report.evaluated_count() == 0 {
        return Err(CcxError::EmptyOrUnsupportedMesh(format!(
            "none of the {} cells has a supported element kind",
            cells.len()
        )));
    }

    Ok(report)
}

pub fn evaluate_cell(cell: &Cell) -> Result<QualityMetrics, CcxError> {
    let kind = match ElementKind::classify(&cell.label, cell.points.len()) {
        Some(k) => k,
        None => {
            return Err(CcxError::UnsupportedElementKind {
                label: cell.label.clone(),
                node_count: cell.points.len(),
            })
        }
    };

    Ok(compute_metrics(kind, &cell.points[..kind.corner_count()]))
}

/// Computes the metrics of one element from its corner points
pub fn compute_metrics(kind: ElementKind, p: &[Point]) -> QualityMetrics {
    let size = element_size(kind, p);

    if is_degenerate(kind, p, size) {
        return QualityMetrics::degenerate(size);
    }

    QualityMetrics {
        aspect_ratio: aspect_ratio(kind, p),
        skew: skew(kind, p),
        warping: warping(kind, p),
        scaled_jacobian: scaled_jacobian(kind, p),
        size,
        degenerate: false,
    }
}

fn edges(kind: ElementKind) -> &'static [[usize; 2]] {
    match kind {
        ElementKind::Triangle => &TRIANGLE_EDGES,
        ElementKind::Quad => &QUAD_EDGES,
        ElementKind::Tetra => &TETRA_EDGES,
        ElementKind::Hexahedron => &HEX_EDGES,
    }
}

fn faces(kind: ElementKind) -> Vec<&'static [usize]> {
    match kind {
        ElementKind::Triangle => TRIANGLE_FACES.iter().map(|f| f.as_slice()).collect(),
        ElementKind::Quad => QUAD_FACES.iter().map(|f| f.as_slice()).collect(),
        ElementKind::Tetra => TETRA_FACES.iter().map(|f| f.as_slice()).collect(),
        ElementKind::Hexahedron => HEX_FACES.iter().map(|f| f.as_slice()).collect(),
    }
}

fn quad_faces(kind: ElementKind) -> &'static [[usize; 4]] {
    match kind {
        ElementKind::Quad => &QUAD_FACES,
        ElementKind::Hexahedron => &HEX_FACES,
        ElementKind::Triangle | ElementKind::Tetra => &[],
    }
}

fn bounding_diagonal(p: &[Point]) -> f64 {
    let mut min = Point::repeat(f64::INFINITY);
    let mut max = Point::repeat(f64::NEG_INFINITY);
    for point in p {
        min = min.inf(point);
        max = max.sup(point);
    }
    (max - min).norm()
}

/// Trilinear Jacobian of a hexahedron at natural coordinates `xi`
fn hex_jacobian(p: &[Point], xi: [f64; 3]) -> Matrix3<f64> {
    let mut d_xi = Point::zeros();
    let mut d_eta = Point::zeros();
    let mut d_zeta = Point::zeros();

    for (point, [a, b, c]) in p.iter().zip(HEX_NATURAL_COORDS) {
        let fa = 1.0 + a * xi[0];
        let fb = 1.0 + b * xi[1];
        let fc = 1.0 + c * xi[2];
        d_xi += point * (a * fb * fc / 8.0);
        d_eta += point * (b * fa * fc / 8.0);
        d_zeta += point * (c * fa * fb / 8.0);
    }

    Matrix3::from_columns(&[d_xi, d_eta, d_zeta])
}

fn element_size(kind: ElementKind, p: &[Point]) -> f64 {
    match kind {
        ElementKind::Triangle => (p[1] - p[0]).cross(&(p[2] - p[0])).norm() / 2.0,
        ElementKind::Quad => (p[2] - p[0]).cross(&(p[3] - p[1])).norm() / 2.0,
        ElementKind::Tetra => (p[1] - p[0]).dot(&(p[2] - p[0]).cross(&(p[3] - p[0]))) / 6.0,
        ElementKind::Hexahedron => {
            // 2x2x2 Gauss points integrate the trilinear determinant exactly
            let g = 1.0 / 3f64.sqrt();
            let mut volume = 0.0;
            for xi in [-g, g] {
                for eta in [-g, g] {
                    for zeta in [-g, g] {
                        volume += hex_jacobian(p, [xi, eta, zeta]).determinant();
                    }
                }
            }
            volume
        }
    }
}

/// A quadrilateral whose diagonal splits both fold over
fn is_butterfly(q: [&Point; 4]) -> bool {
    let split_a = (q[1] - q[0])
        .cross(&(q[2] - q[0]))
        .dot(&(q[2] - q[0]).cross(&(q[3] - q[0])));
    let split_b = (q[2] - q[1])
        .cross(&(q[3] - q[1]))
        .dot(&(q[3] - q[1]).cross(&(q[0] - q[1])));

    split_a < 0.0 && split_b < 0.0
}

fn is_degenerate(kind: ElementKind, p: &[Point], size: f64) -> bool {
    let scale = bounding_diagonal(p);
    if !(scale > 0.0) {
        return true;
    }

    for i in 0..p.len() {
        for j in (i + 1)..p.len() {
            if (p[i] - p[j]).norm() <= DEGENERACY_TOLERANCE * scale {
                return true;
            }
        }
    }

    let dim = if kind.is_solid() { 3 } else { 2 };
    if size.abs() <= DEGENERACY_TOLERANCE * scale.powi(dim) {
        return true;
    }

    quad_faces(kind)
        .iter()
        .any(|f| is_butterfly([&p[f[0]], &p[f[1]], &p[f[2]], &p[f[3]]]))
}

fn aspect_ratio(kind: ElementKind, p: &[Point]) -> f64 {
    let mut shortest = f64::INFINITY;
    let mut longest: f64 = 0.0;
    for [a, b] in edges(kind) {
        let length = (p[*b] - p[*a]).norm();
        shortest = shortest.min(length);
        longest = longest.max(length);
    }
    longest / shortest
}

fn skew(kind: ElementKind, p: &[Point]) -> f64 {
    let ideal: f64 = match kind {
        ElementKind::Triangle | ElementKind::Tetra => 60.0,
        ElementKind::Quad | ElementKind::Hexahedron => 90.0,
    };

    let mut min_angle = f64::INFINITY;
    let mut max_angle = f64::NEG_INFINITY;
    for face in faces(kind) {
        let n = face.len();
        for k in 0..n {
            let at = p[face[k]];
            let next = p[face[(k + 1) % n]] - at;
            let prev = p[face[(k + n - 1) % n]] - at;
            let angle = next.angle(&prev).to_degrees();
            min_angle = min_angle.min(angle);
            max_angle = max_angle.max(angle);
        }
    }

    let skew = f64::max(
        (max_angle - ideal) / (180.0 - ideal),
        (ideal - min_angle) / ideal,
    );
    skew.clamp(0.0, 1.0)
}

fn face_warping(p: &[Point], f: &[usize; 4]) -> f64 {
    let normal = (p[f[2]] - p[f[0]]).cross(&(p[f[3]] - p[f[1]]));
    let normal_length = normal.norm();
    if normal_length == 0.0 {
        return 0.0;
    }
    let normal = normal / normal_length;

    let centroid = f.iter().map(|&i| p[i]).sum::<Point>() / 4.0;
    let mean_edge = (0..4)
        .map(|k| (p[f[(k + 1) % 4]] - p[f[k]]).norm())
        .sum::<f64>()
        / 4.0;

    f.iter()
        .map(|&i| (p[i] - centroid).dot(&normal).abs())
        .fold(0.0, f64::max)
        / mean_edge
}

fn warping(kind: ElementKind, p: &[Point]) -> f64 {
    quad_faces(kind)
        .iter()
        .map(|f| face_warping(p, f))
        .fold(0.0, f64::max)
}

/// Minimum over corners of the corner cross product projected on `normal`
fn polygon_scaled_jacobian(p: &[Point], normal: &Point) -> f64 {
    let n = p.len();
    (0..n)
        .map(|k| {
            let next = p[(k + 1) % n] - p[k];
            let prev = p[(k + n - 1) % n] - p[k];
            next.cross(&prev).dot(normal) / (next.norm() * prev.norm())
        })
        .fold(f64::INFINITY, f64::min)
}

fn scaled_jacobian(kind: ElementKind, p: &[Point]) -> f64 {
    match kind {
        ElementKind::Triangle => {
            let normal = (p[1] - p[0]).cross(&(p[2] - p[0])).normalize();
            polygon_scaled_jacobian(p, &normal) * 2.0 / 3f64.sqrt()
        }
        ElementKind::Quad => {
            let normal = (p[2] - p[0]).cross(&(p[3] - p[1])).normalize();
            polygon_scaled_jacobian(p, &normal)
        }
        ElementKind::Tetra => {
            let six_volume = (p[1] - p[0]).dot(&(p[2] - p[0]).cross(&(p[3] - p[0])));
            (0..4)
                .map(|k| {
                    let lengths: f64 = (0..4)
                        .filter(|&j| j != k)
                        .map(|j| (p[j] - p[k]).norm())
                        .product();
                    2f64.sqrt() * six_volume / lengths
                })
                .fold(f64::INFINITY, f64::min)
        }
        ElementKind::Hexahedron => {
            let corners = HEX_CORNER_NEIGHBOURS.iter().enumerate().map(|(k, [a, b, c])| {
                let ea = p[*a] - p[k];
                let eb = p[*b] - p[k];
                let ec = p[*c] - p[k];
                ea.dot(&eb.cross(&ec)) / (ea.norm() * eb.norm() * ec.norm())
            });

            let x1 = (p[1] + p[2] + p[6] + p[5]) - (p[0] + p[3] + p[7] + p[4]);
            let x2 = (p[2] + p[3] + p[7] + p[6]) - (p[0] + p[1] + p[5] + p[4]);
            let x3 = (p[4] + p[5] + p[6] + p[7]) - (p[0] + p[1] + p[2] + p[3]);
            let centre = x1.dot(&x2.cross(&x3)) / (x1.norm() * x2.norm() * x3.norm());

            corners.fold(centre, f64::min)
        }
    }
}
