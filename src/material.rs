use crate::inp::{is_comment, Keyword};

pub const YOUNGS_MODULUS: f64 = 210000.0;
pub const POISSON_RATIO: f64 = 0.3;

/// Cards that belong to the `*MATERIAL` block above them
const MATERIAL_PROPERTY_CARDS: [&str; 19] = [
    "ELASTIC",
    "DENSITY",
    "EXPANSION",
    "CONDUCTIVITY",
    "SPECIFIC HEAT",
    "PLASTIC",
    "CYCLIC HARDENING",
    "CREEP",
    "DAMPING",
    "DEPVAR",
    "USER MATERIAL",
    "HYPERELASTIC",
    "HYPERFOAM",
    "DEFORMATION PLASTICITY",
    "ELECTRICAL CONDUCTIVITY",
    "MAGNETIC PERMEABILITY",
    "FLUID CONSTANTS",
    "COMPRESSION ONLY",
    "TENSION ONLY",
];

enum MaterialState {
    Outside,
    InMaterial { has_elastic: bool },
    InElastic,
}

#[derive(Debug, Default, PartialEq)]
pub struct MaterialSummary {
    pub materials: usize,
    pub replaced: usize,
    pub inserted: usize,
}

fn push_isotropic_elastic(output: &mut Vec<String>) {
    output.push("*ELASTIC".to_string());
    output.push(format!("{YOUNGS_MODULUS}, {POISSON_RATIO}"));
}

/// Rewrites every material of an input deck as the fixed isotropic material
///
/// `*ELASTIC` cards lose their parameters and data lines; materials without
/// one get a card appended at the end of their block. Everything else is
/// copied verbatim.
///
/// # Arguments
/// * `contents` - The text of the .inp file
///
/// # Returns
/// The rewritten deck and a count of what was changed
pub fn replace_materials(contents: &str) -> (String, MaterialSummary) {
    let mut output: Vec<String> = Vec::new();
    let mut summary = MaterialSummary::default();
    let mut state = MaterialState::Outside;

    for line in contents.lines() {
        if is_comment(line) {
            output.push(line.to_string());
            continue;
        }

        let keyword = match Keyword::parse(line) {
            Some(k) => k,
            None => {
                if !matches!(state, MaterialState::InElastic) {
                    output.push(line.to_string());
                }
                continue;
            }
        };

        let in_material = !matches!(state, MaterialState::Outside);
        let is_property = MATERIAL_PROPERTY_CARDS.contains(&keyword.name.as_str());

        if in_material && is_property {
            if keyword.name == "ELASTIC" {
                push_isotropic_elastic(&mut output);
                summary.replaced += 1;
                state = MaterialState::InElastic;
            } else {
                output.push(line.to_string());
                let has_elastic = match state {
                    MaterialState::InMaterial { has_elastic } => has_elastic,
                    _ => true,
                };
                state = MaterialState::InMaterial { has_elastic };
            }
            continue;
        }

        // any other card closes the material block
        if let MaterialState::InMaterial { has_elastic: false } = state {
            push_isotropic_elastic(&mut output);
            summary.inserted += 1;
        }
        state = MaterialState::Outside;

        if keyword.name == "MATERIAL" {
            summary.materials += 1;
            state = MaterialState::InMaterial { has_elastic: false };
        }
        output.push(line.to_string());
    }

    if let MaterialState::InMaterial { has_elastic: false } = state {
        push_isotropic_elastic(&mut output);
        summary.inserted += 1;
    }

    let mut text = output.join("\n");
    text.push('\n');
    (text, summary)
}
