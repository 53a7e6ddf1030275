use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use tempfile::{NamedTempFile, TempPath};

use crate::{
    datatypes::{CellField, ElementKind, Mesh, MeshWriter},
    error::CcxError,
    quality::{QualityReport, METRIC_NAMES},
};

/// Marker written in place of metric values for cells that were not evaluated
pub const UNSUPPORTED_MARKER: &str = "unsupported";

/// Mode of committed outputs, as for a plain file under the usual umask
#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o644;

/// Writes the quality report as CSV, one row per cell in mesh order
///
/// # Arguments
/// * `report` - The evaluated report
/// * `out` - The destination of the csv text
pub fn write_csv(report: &QualityReport, out: &mut dyn Write) -> Result<(), CcxError> {
    writeln!(out, "cell_index,{},degenerate", METRIC_NAMES.join(","))?;

    for cell in &report.cells {
        match &cell.outcome {
            Ok(metrics) => {
                let values: Vec<String> = metrics.values().iter().map(|v| v.to_string()).collect();
                writeln!(
                    out,
                    "{},{},{}",
                    cell.index,
                    values.join(","),
                    metrics.degenerate
                )?;
            }
            Err(_) => {
                let markers = [UNSUPPORTED_MARKER; METRIC_NAMES.len() + 1];
                writeln!(out, "{},{}", cell.index, markers.join(","))?;
            }
        }
    }

    Ok(())
}

fn start_tag<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attributes: &[(&str, &str)],
) -> Result<(), CcxError> {
    let mut start = BytesStart::new(name);
    for attribute in attributes {
        start.push_attribute(*attribute);
    }
    writer.write_event(Event::Start(start))?;
    Ok(())
}

fn end_tag<W: Write>(writer: &mut Writer<W>, name: &str) -> Result<(), CcxError> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn data_array<W: Write>(
    writer: &mut Writer<W>,
    attributes: &[(&str, &str)],
    values: &str,
) -> Result<(), CcxError> {
    start_tag(writer, "DataArray", attributes)?;
    writer.write_event(Event::Text(BytesText::new(values)))?;
    end_tag(writer, "DataArray")
}

fn join<T: ToString>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<String>>().join(" ")
}

/// Writes VTK XML unstructured grids (`.vtu`) with ascii data arrays
pub struct VtuWriter;

impl MeshWriter for VtuWriter {
    fn write_mesh(
        &self,
        out: &mut dyn Write,
        mesh: &Mesh,
        fields: &[CellField],
    ) -> Result<(), CcxError> {
        for field in fields {
            if field.values.len() != mesh.elements.len() {
                return Err(CcxError::Output(format!(
                    "Field {} has {} values for {} elements",
                    field.name,
                    field.values.len(),
                    mesh.elements.len()
                )));
            }
        }

        let exported: Vec<(usize, ElementKind)> = mesh
            .elements
            .iter()
            .enumerate()
            .filter_map(|(i, element)| element.kind().map(|kind| (i, kind)))
            .collect();

        for element in mesh.elements.iter().filter(|e| e.kind().is_none()) {
            warn!(
                "element {} of type {} with {} nodes has no VTK cell type, skipping",
                element.id,
                element.label,
                element.nodes.len()
            );
        }

        if exported.is_empty() {
            return Err(CcxError::EmptyOrUnsupportedMesh(
                "No valid elements converted to VTK types".to_string(),
            ));
        }

        let mut connectivity: Vec<usize> = Vec::new();
        let mut offsets: Vec<usize> = Vec::with_capacity(exported.len());
        for (i, kind) in &exported {
            connectivity.extend(&mesh.elements[*i].nodes[..kind.corner_count()]);
            offsets.push(connectivity.len());
        }

        let points = join(
            mesh.nodes
                .iter()
                .map(|n| format!("{} {} {}", n.vertex.x, n.vertex.y, n.vertex.z)),
        );
        let number_of_points = mesh.nodes.len().to_string();
        let number_of_cells = exported.len().to_string();

        let mut writer = Writer::new_with_indent(out, b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;

        start_tag(
            &mut writer,
            "VTKFile",
            &[
                ("type", "UnstructuredGrid"),
                ("version", "1.0"),
                ("byte_order", "LittleEndian"),
                ("header_type", "UInt64"),
            ],
        )?;
        start_tag(&mut writer, "UnstructuredGrid", &[])?;
        start_tag(
            &mut writer,
            "Piece",
            &[
                ("NumberOfPoints", number_of_points.as_str()),
                ("NumberOfCells", number_of_cells.as_str()),
            ],
        )?;

        start_tag(&mut writer, "Points", &[])?;
        data_array(
            &mut writer,
            &[
                ("type", "Float64"),
                ("NumberOfComponents", "3"),
                ("format", "ascii"),
            ],
            &points,
        )?;
        end_tag(&mut writer, "Points")?;

        start_tag(&mut writer, "Cells", &[])?;
        data_array(
            &mut writer,
            &[
                ("type", "Int64"),
                ("Name", "connectivity"),
                ("format", "ascii"),
            ],
            &join(connectivity.iter()),
        )?;
        data_array(
            &mut writer,
            &[("type", "Int64"), ("Name", "offsets"), ("format", "ascii")],
            &join(offsets.iter()),
        )?;
        data_array(
            &mut writer,
            &[("type", "UInt8"), ("Name", "types"), ("format", "ascii")],
            &join(exported.iter().map(|(_, kind)| kind.vtk_cell_type())),
        )?;
        end_tag(&mut writer, "Cells")?;

        if let Some(first) = fields.first() {
            start_tag(&mut writer, "CellData", &[("Scalars", first.name.as_str())])?;
            for field in fields {
                data_array(
                    &mut writer,
                    &[
                        ("type", "Float64"),
                        ("Name", field.name.as_str()),
                        ("format", "ascii"),
                    ],
                    &join(exported.iter().map(|(i, _)| field.values[*i])),
                )?;
            }
            end_tag(&mut writer, "CellData")?;
        }

        end_tag(&mut writer, "Piece")?;
        end_tag(&mut writer, "UnstructuredGrid")?;
        end_tag(&mut writer, "VTKFile")?;
        writeln!(writer.get_mut())?;

        Ok(())
    }
}

/// An output written to a temporary file next to its destination
pub struct StagedFile {
    file: NamedTempFile,
    target: PathBuf,
}

/// Writes an output into a temporary file in the target's directory. Nothing
/// appears at `target` until the staged file is committed.
pub fn stage<F>(target: &Path, write: F) -> Result<StagedFile, CcxError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), CcxError>,
{
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let file = match NamedTempFile::new_in(dir) {
        Ok(f) => f,
        Err(err) => {
            return Err(CcxError::Output(format!(
                "Failed to create temporary file for {}: {err}",
                target.display()
            )))
        }
    };

    {
        let mut buffered = BufWriter::new(file.as_file());
        write(&mut buffered)?;
        buffered.flush()?;
    }

    // temporary files are created owner-only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(OUTPUT_MODE))?;
    }

    Ok(StagedFile {
        file,
        target: target.to_path_buf(),
    })
}

/// Moves an existing output aside so a failed commit can put it back.
/// The backup is deleted when the returned path is dropped.
fn back_up(target: &Path) -> Result<TempPath, CcxError> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let backup = tempfile::Builder::new()
        .prefix(".ccxdebug-backup")
        .tempfile_in(dir)?
        .into_temp_path();
    std::fs::rename(target, &backup)?;

    Ok(backup)
}

fn roll_back(committed: &[PathBuf], backups: &[(TempPath, PathBuf)]) {
    for path in committed {
        let _ = std::fs::remove_file(path);
    }
    for (backup, target) in backups {
        let _ = std::fs::rename(backup, target);
    }
}

/// Moves staged files to their destinations. If one of them fails, the ones
/// already moved are removed, files they replaced are restored and the rest
/// are discarded.
pub fn commit(staged_files: Vec<StagedFile>) -> Result<Vec<PathBuf>, CcxError> {
    let mut committed: Vec<PathBuf> = Vec::with_capacity(staged_files.len());
    let mut backups: Vec<(TempPath, PathBuf)> = Vec::new();

    for StagedFile { file, target } in staged_files {
        if target.is_file() {
            match back_up(&target) {
                Ok(backup) => backups.push((backup, target.clone())),
                Err(err) => {
                    roll_back(&committed, &backups);
                    return Err(err);
                }
            }
        }

        if let Err(err) = file.persist(&target) {
            roll_back(&committed, &backups);
            return Err(CcxError::Output(format!(
                "Failed to write {}: {}",
                target.display(),
                err.error
            )));
        }
        committed.push(target);
    }

    for path in &committed {
        info!("wrote {}", path.display());
    }

    Ok(committed)
}
