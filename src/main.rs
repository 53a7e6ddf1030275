use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use log::{error, info};

mod config;
mod datatypes;
mod error;
mod inp;
mod material;
mod post_processor;
mod quality;

use config::Thresholds;
use datatypes::{MeshReader, MeshWriter};
use error::CcxError;
use inp::InpReader;
use post_processor::VtuWriter;

/// CCXDebug: process CalculiX .inp files
#[derive(Parser)]
#[command(name = "ccxdebug", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log more (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Replace materials with isotropic properties
    Iso {
        /// Input .inp file
        input_file: PathBuf,
    },
    /// Convert .inp to VTU format
    Vtu {
        /// Input .inp file
        input_file: PathBuf,
    },
    /// Analyze mesh quality
    Quality {
        /// Input .inp file
        input_file: PathBuf,

        /// Json file overriding the problem thresholds
        #[arg(long)]
        thresholds: Option<PathBuf>,
    },
}

/// Builds `<stem><suffix>.<extension>` next to the input file
fn output_path(input: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}{suffix}.{extension}"))
}

fn run_iso(input: &Path) -> Result<PathBuf, CcxError> {
    if !input.exists() {
        return Err(CcxError::FileNotFound(input.to_path_buf()));
    }

    let contents = match std::fs::read_to_string(input) {
        Ok(c) => c,
        Err(err) => {
            return Err(CcxError::Input(format!(
                "Unable to read input file {}: {err}",
                input.display()
            )))
        }
    };

    let (rewritten, summary) = material::replace_materials(&contents);
    info!(
        "{} materials: replaced {} elastic cards, added {}",
        summary.materials, summary.replaced, summary.inserted
    );

    let output = output_path(input, "_iso", "inp");
    let staged = post_processor::stage(&output, |out| Ok(out.write_all(rewritten.as_bytes())?))?;
    post_processor::commit(vec![staged])?;

    Ok(output)
}

fn run_vtu(
    reader: &impl MeshReader,
    writer: &impl MeshWriter,
    input: &Path,
) -> Result<PathBuf, CcxError> {
    let mesh = reader.load(input)?;

    let output = output_path(input, "", "vtu");
    let staged = post_processor::stage(&output, |out| writer.write_mesh(out, &mesh, &[]))?;
    post_processor::commit(vec![staged])?;

    Ok(output)
}

fn run_quality(
    reader: &impl MeshReader,
    writer: &impl MeshWriter,
    input: &Path,
    thresholds: &Thresholds,
) -> Result<(PathBuf, PathBuf), CcxError> {
    let mesh = reader.load(input)?;

    let report = quality::evaluate(&mesh.cells())?;
    report.log_summary(thresholds);

    let csv_output = output_path(input, "_quality", "csv");
    let vtu_output = output_path(input, "_quality", "vtu");
    let fields = report.fields();

    let staged = vec![
        post_processor::stage(&csv_output, |out| post_processor::write_csv(&report, out))?,
        post_processor::stage(&vtu_output, |out| writer.write_mesh(out, &mesh, &fields))?,
    ];
    post_processor::commit(staged)?;

    Ok((csv_output, vtu_output))
}

fn run(command: Command) -> Result<(), CcxError> {
    match command {
        Command::Iso { input_file } => {
            let output = run_iso(&input_file)?;
            info!("Isotropic material file saved as {}", output.display());
        }
        Command::Vtu { input_file } => {
            let output = run_vtu(&InpReader, &VtuWriter, &input_file)?;
            info!("VTU file saved as {}", output.display());
        }
        Command::Quality {
            input_file,
            thresholds,
        } => {
            let thresholds = match thresholds {
                Some(path) => config::load_thresholds(&path)?,
                None => Thresholds::default(),
            };
            let (csv_output, vtu_output) =
                run_quality(&InpReader, &VtuWriter, &input_file, &thresholds)?;
            info!(
                "Mesh quality analysis saved as {} and {}",
                csv_output.display(),
                vtu_output.display()
            );
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    if let Err(err) = run(cli.command) {
        error!("{err}");
        std::process::exit(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_HEXES: &str = "\
*NODE
1, 0, 0, 0
2, 1, 0, 0
3, 1, 1, 0
4, 0, 1, 0
5, 0, 0, 1
6, 1, 0, 1
7, 1, 1, 1
8, 0, 1, 1
9, 2, 0, 0
10, 2, 1, 0
11, 2, 0, 1
12, 2, 1, 1
*ELEMENT, TYPE=C3D8, ELSET=Eall
1, 1, 2, 3, 4, 5, 6, 7, 8
2, 2, 9, 10, 3, 6, 11, 12, 7
3, 1, 2, 3, 4, 1, 2, 3, 4
*MATERIAL, NAME=STEEL
*ELASTIC
200000, 0.29
";

    fn write_input(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn output_names_use_the_input_stem() {
        assert_eq!(
            output_path(Path::new("/tmp/run/beam.inp"), "_iso", "inp"),
            PathBuf::from("/tmp/run/beam_iso.inp")
        );
        assert_eq!(
            output_path(Path::new("beam.inp"), "_quality", "csv"),
            PathBuf::from("beam_quality.csv")
        );
        assert_eq!(
            output_path(Path::new("deck.v2.inp"), "", "vtu"),
            PathBuf::from("deck.v2.vtu")
        );
    }

    #[test]
    fn quality_writes_csv_and_vtu() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "three.inp", THREE_HEXES);

        let (csv_output, vtu_output) =
            run_quality(&InpReader, &VtuWriter, &input, &Thresholds::default()).unwrap();
        assert_eq!(csv_output, dir.path().join("three_quality.csv"));
        assert_eq!(vtu_output, dir.path().join("three_quality.vtu"));

        let csv = std::fs::read_to_string(&csv_output).unwrap();
        let rows: Vec<&str> = csv.lines().collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[1].starts_with("0,") && rows[1].ends_with(",false"));
        assert!(rows[2].starts_with("1,") && rows[2].ends_with(",false"));
        assert_eq!(rows[3], "2,NaN,NaN,NaN,NaN,true");

        let vtu = std::fs::read_to_string(&vtu_output).unwrap();
        let doc = roxmltree::Document::parse(&vtu).unwrap();
        let piece = doc
            .descendants()
            .find(|n| n.tag_name().name() == "Piece")
            .unwrap();
        assert_eq!(piece.attribute("NumberOfCells"), Some("3"));

        let cell_data = doc
            .descendants()
            .find(|n| n.tag_name().name() == "CellData")
            .unwrap();
        let arrays: Vec<roxmltree::Node> = cell_data
            .children()
            .filter(|n| n.is_element())
            .collect();
        let names: Vec<&str> = arrays.iter().filter_map(|n| n.attribute("Name")).collect();
        assert_eq!(names, quality::METRIC_NAMES.to_vec());
        for array in arrays {
            assert_eq!(array.attribute("type"), Some("Float64"));
            let values: Vec<&str> = array.text().unwrap().split_whitespace().collect();
            assert_eq!(values.len(), 3);
            assert_eq!(values[2], "NaN");
        }
    }

    #[test]
    fn quality_of_unsupported_mesh_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(
            dir.path(),
            "beams.inp",
            "*NODE\n1, 0, 0, 0\n2, 1, 0, 0\n*ELEMENT, TYPE=B31\n1, 1, 2\n",
        );

        let err = run_quality(&InpReader, &VtuWriter, &input, &Thresholds::default()).unwrap_err();
        assert!(matches!(err, CcxError::EmptyOrUnsupportedMesh(_)));
        assert!(!dir.path().join("beams_quality.csv").exists());
        assert!(!dir.path().join("beams_quality.vtu").exists());
    }

    #[test]
    fn missing_input_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("absent.inp");

        assert!(matches!(run_iso(&input), Err(CcxError::FileNotFound(_))));
        assert!(matches!(
            run_vtu(&InpReader, &VtuWriter, &input),
            Err(CcxError::FileNotFound(_))
        ));
        assert!(matches!(
            run_quality(&InpReader, &VtuWriter, &input, &Thresholds::default()),
            Err(CcxError::FileNotFound(_))
        ));
    }

    #[test]
    fn iso_output_is_stable_when_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "model.inp", THREE_HEXES);

        let first = run_iso(&input).unwrap();
        assert_eq!(first, dir.path().join("model_iso.inp"));
        let first_text = std::fs::read_to_string(&first).unwrap();
        assert!(first_text.contains("*ELASTIC\n210000, 0.3\n"));
        assert!(!first_text.contains("200000, 0.29"));

        let second = run_iso(&first).unwrap();
        assert_eq!(second, dir.path().join("model_iso_iso.inp"));
        assert_eq!(std::fs::read_to_string(&second).unwrap(), first_text);
    }

    #[test]
    fn vtu_converts_geometry_only() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "mesh.inp", THREE_HEXES);

        let output = run_vtu(&InpReader, &VtuWriter, &input).unwrap();
        assert_eq!(output, dir.path().join("mesh.vtu"));

        let vtu = std::fs::read_to_string(&output).unwrap();
        let doc = roxmltree::Document::parse(&vtu).unwrap();
        let piece = doc
            .descendants()
            .find(|n| n.tag_name().name() == "Piece")
            .unwrap();
        assert_eq!(piece.attribute("NumberOfPoints"), Some("12"));
        assert_eq!(piece.attribute("NumberOfCells"), Some("3"));
        assert!(doc.descendants().all(|n| n.tag_name().name() != "CellData"));
    }

    #[test]
    fn cli_parses_subcommands() {
        let args = ["ccxdebug", "-v", "quality", "a.inp", "--thresholds", "t.json"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(
            cli.command,
            Command::Quality { input_file, thresholds: Some(t) }
                if input_file == Path::new("a.inp") && t == Path::new("t.json")
        ));

        assert!(Cli::try_parse_from(["ccxdebug", "iso"]).is_err());
        assert!(Cli::try_parse_from(["ccxdebug", "mesh", "a.inp"]).is_err());
    }
}
