//! Best-effort repairs applied to the engine's G-code.
//!
//! Two transformations run in order: the start-sequence repair swaps the
//! unresolved heat-up placeholders some engine versions leave behind for a
//! purge sequence computed from the machine geometry, and the region filter
//! drops the moves of unwanted feature types (the skirt by default). Lines are
//! recognised by opcode and comment marker, never by exact full-line text.
//!
//! Neither transformation can fail the slice. A failure is reported as
//! [`TransformOutcome::Skipped`], logged, and the text is left as it was
//! before that step.

use crate::config::{PostProcessConfig, StartSequenceMode};
use crate::core::definitions::{bed_size, BedSize};
use crate::core::settings::{first_layer_temperature, setting_as_int};
use crate::core::{JobId, PostProcessReport, SettingsMap, TransformOutcome, TransformRecord};
use serde_json::Value;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const START_SEQUENCE: &str = "start-sequence";
pub const REGION_FILTER: &str = "skirt-removal";

/// First line of every synthesized sequence; used to avoid inserting twice.
pub const START_SEQUENCE_MARKER: &str = "; safe start sequence";

/// Engine setting that carries the start G-code.
pub const START_GCODE_KEY: &str = "machine_start_gcode";

const PURGE_Z: f64 = 0.28;
const PURGE_STEP_X: f64 = 0.4;
/// Filament pushed per millimetre of purge stroke.
const PURGE_E_PER_MM: f64 = 0.075;

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("bed {width}x{depth} is too small for purge margins {margin_x}/{margin_y}")]
    BedTooSmall {
        width: f64,
        depth: f64,
        margin_x: f64,
        margin_y: f64,
    },

    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8 text")]
    NotUtf8 { path: String },

    #[error("could not write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// A heat-up line shape known to survive unresolved in engine output.
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderVariant {
    pub name: &'static str,
    /// Engine release the shape was first seen in.
    pub since: &'static str,
    pub opcodes: &'static [&'static str],
    pub token: &'static str,
    pub setting: &'static str,
    pub fallback: i64,
    /// The first anchor line found is where the start sequence goes.
    pub anchor: bool,
}

pub const PLACEHOLDER_VARIANTS: &[PlaceholderVariant] = &[
    PlaceholderVariant {
        name: "nozzle-wait",
        since: "5.11",
        opcodes: &["M109"],
        token: "{material_print_temperature_layer_0}",
        setting: "material_print_temperature_layer_0",
        fallback: 200,
        anchor: true,
    },
    PlaceholderVariant {
        name: "nozzle-set",
        since: "5.12",
        opcodes: &["M104"],
        token: "{material_print_temperature_layer_0}",
        setting: "material_print_temperature_layer_0",
        fallback: 200,
        anchor: true,
    },
    PlaceholderVariant {
        name: "bed",
        since: "5.12",
        opcodes: &["M140", "M190"],
        token: "{material_bed_temperature_layer_0}",
        setting: "material_bed_temperature_layer_0",
        fallback: 60,
        anchor: false,
    },
];

/// Splits a G-code line into its upper-cased opcode and the code part
/// (everything before the first `;`).
fn parse_line(line: &str) -> (Option<String>, &str) {
    let code = line.split(';').next().unwrap_or_default();
    let opcode = code.split_whitespace().next().map(str::to_ascii_uppercase);
    (opcode, code)
}

/// `;KEY:value` marker comments, e.g. `;TYPE:SKIRT` or `;LAYER:3`.
fn marker<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.trim_start()
        .strip_prefix(';')?
        .strip_prefix(key)?
        .strip_prefix(':')
        .map(str::trim)
}

/// Purge sequence confined to the front-left corner of the bed.
pub fn synthesize_start_sequence(
    bed: BedSize,
    margin_x: f64,
    margin_y: f64,
    temperature: i64,
) -> Result<String, PostProcessError> {
    let x0 = margin_x;
    let x1 = margin_x + PURGE_STEP_X;
    let y_front = margin_y;
    let y_back = bed.depth - margin_y;

    if x1 > bed.width || y_back <= y_front {
        return Err(PostProcessError::BedTooSmall {
            width: bed.width,
            depth: bed.depth,
            margin_x,
            margin_y,
        });
    }

    let stroke = (y_back - y_front) * PURGE_E_PER_MM;
    let mut out = String::new();
    let _ = writeln!(out, "{}", START_SEQUENCE_MARKER);
    let _ = writeln!(out, "M220 S100 ; reset feedrate");
    let _ = writeln!(out, "M221 S100 ; reset flowrate");
    let _ = writeln!(out, "G28 ; home all axes");
    let _ = writeln!(out, "G92 E0 ; reset extrusion");
    let _ = writeln!(out, "G1 Z2.0 F3000 ; raise Z");
    let _ = writeln!(
        out,
        "G1 X{:.1} Y{:.1} Z{:.2} F5000.0 ; move to purge start",
        x0, y_front, PURGE_Z
    );
    let _ = writeln!(out, "M109 S{} ; wait for first layer temperature", temperature);
    let _ = writeln!(
        out,
        "G1 X{:.1} Y{:.1} Z{:.2} F1500.0 E{:.3} ; first purge stroke",
        x0, y_back, PURGE_Z, stroke
    );
    let _ = writeln!(out, "G1 X{:.1} Y{:.1} Z{:.2} F5000.0 ; step over", x1, y_back, PURGE_Z);
    let _ = writeln!(
        out,
        "G1 X{:.1} Y{:.1} Z{:.2} F1500.0 E{:.3} ; second purge stroke",
        x1,
        y_front,
        PURGE_Z,
        stroke * 2.0
    );
    let _ = writeln!(out, "G92 E0 ; reset extrusion");
    let _ = writeln!(out, "G1 E-2.0 F2700 ; retract");
    let _ = write!(out, "G1 Z2.0 F3000 ; raise Z");
    Ok(out)
}

/// Replaces known placeholder lines. The first anchor line becomes
/// `sequence` (unless the text already carries one); every other match gets
/// its token replaced with the resolved value. Returns the new text and the
/// number of lines touched.
pub fn repair_placeholders(
    text: &str,
    sequence: &str,
    variants: &[&PlaceholderVariant],
    settings: &SettingsMap,
) -> (String, usize) {
    let mut sequence_placed = text.contains(START_SEQUENCE_MARKER);
    let mut touched = 0;
    let mut out = String::with_capacity(text.len() + sequence.len());

    for line in text.split_inclusive('\n') {
        let (opcode, code) = parse_line(line);
        let matched = opcode.as_deref().and_then(|op| {
            variants
                .iter()
                .find(|v| v.opcodes.contains(&op) && code.contains(v.token))
        });

        let Some(variant) = matched else {
            out.push_str(line);
            continue;
        };

        touched += 1;
        if variant.anchor && !sequence_placed {
            sequence_placed = true;
            out.push_str(sequence);
            if line.ends_with('\n') {
                out.push('\n');
            }
        } else {
            let value = setting_as_int(settings, variant.setting, variant.fallback);
            out.push_str(&line.replace(variant.token, &value.to_string()));
        }
    }

    (out, touched)
}

/// Drops every line inside a region whose `;TYPE:` is one of `feature_types`.
/// The region's own marker and the marker that ends it are kept. Returns the
/// new text, the number of regions and the number of dropped lines.
pub fn strip_feature_regions(text: &str, feature_types: &[String]) -> (String, usize, usize) {
    let mut in_region = false;
    let mut regions = 0;
    let mut dropped = 0;
    let mut out = String::with_capacity(text.len());

    for line in text.split_inclusive('\n') {
        if let Some(feature) = marker(line, "TYPE") {
            let strip = feature_types.iter().any(|t| t.eq_ignore_ascii_case(feature));
            if strip && !in_region {
                regions += 1;
            }
            in_region = strip;
            out.push_str(line);
        } else if marker(line, "LAYER").is_some() {
            in_region = false;
            out.push_str(line);
        } else if in_region {
            dropped += 1;
        } else {
            out.push_str(line);
        }
    }

    (out, regions, dropped)
}

/// What the post-processor needs to know about one job.
#[derive(Debug, Clone, Copy)]
pub struct PostProcessContext<'a> {
    pub job: &'a JobId,
    pub settings: &'a SettingsMap,
    pub machine_definition: &'a Path,
}

#[derive(Debug, Clone)]
pub struct PostProcessor {
    config: PostProcessConfig,
}

impl PostProcessor {
    pub fn new(config: &PostProcessConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn mode(&self) -> StartSequenceMode {
        self.config.start_sequence
    }

    fn enabled_variants(&self) -> Vec<&'static PlaceholderVariant> {
        PLACEHOLDER_VARIANTS
            .iter()
            .filter(|v| self.config.placeholder_variants.iter().any(|name| name == v.name))
            .collect()
    }

    pub fn start_sequence(&self, ctx: &PostProcessContext<'_>) -> Result<String, PostProcessError> {
        let fallback = BedSize {
            width: self.config.default_bed_width,
            depth: self.config.default_bed_depth,
        };
        let bed = bed_size(ctx.machine_definition, fallback);
        synthesize_start_sequence(
            bed,
            self.config.margin_x,
            self.config.margin_y,
            first_layer_temperature(ctx.settings),
        )
    }

    /// Adds the start sequence as `machine_start_gcode` when the mode asks for
    /// it and the caller did not set that key. Returns whether it was added.
    pub fn inject_start_setting(
        &self,
        settings: &mut SettingsMap,
        ctx: &PostProcessContext<'_>,
    ) -> bool {
        if self.config.start_sequence != StartSequenceMode::Setting
            || settings.contains_key(START_GCODE_KEY)
        {
            return false;
        }
        match self.start_sequence(ctx) {
            Ok(sequence) => {
                settings.insert(START_GCODE_KEY.to_string(), Value::String(sequence));
                true
            }
            Err(e) => {
                tracing::warn!(job = %ctx.job, "Start sequence not injected: {}", e);
                false
            }
        }
    }

    pub fn process_text(
        &self,
        text: &str,
        ctx: &PostProcessContext<'_>,
    ) -> (String, PostProcessReport) {
        let mut report = PostProcessReport::default();
        let mut current = text.to_string();

        if self.config.start_sequence != StartSequenceMode::Off {
            let outcome = match self.start_sequence(ctx) {
                Ok(sequence) => {
                    let variants = self.enabled_variants();
                    let (repaired, touched) =
                        repair_placeholders(&current, &sequence, &variants, ctx.settings);
                    if touched > 0 {
                        current = repaired;
                        TransformOutcome::Applied {
                            detail: format!("repaired {} placeholder line(s)", touched),
                        }
                    } else {
                        TransformOutcome::Unchanged
                    }
                }
                Err(e) => TransformOutcome::Skipped { reason: e.to_string() },
            };
            record(&mut report, ctx.job, START_SEQUENCE, outcome);
        }

        if self.config.remove_skirt {
            let (filtered, regions, dropped) =
                strip_feature_regions(&current, &self.config.strip_feature_types);
            let outcome = if regions > 0 {
                current = filtered;
                TransformOutcome::Applied {
                    detail: format!("removed {} line(s) from {} region(s)", dropped, regions),
                }
            } else {
                TransformOutcome::Unchanged
            };
            record(&mut report, ctx.job, REGION_FILTER, outcome);
        }

        (current, report)
    }

    /// Rewrites the G-code file in place. The file is only replaced when at
    /// least one transformation changed it, and the replacement is atomic.
    pub fn process_file(&self, path: &Path, ctx: &PostProcessContext<'_>) -> PostProcessReport {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(source) => {
                let err = PostProcessError::Read {
                    path: path.display().to_string(),
                    source,
                };
                return self.skip_all(ctx.job, &err);
            }
        };
        // Rewriting lossily would corrupt bytes the transforms never touch.
        let Ok(original) = String::from_utf8(bytes) else {
            let err = PostProcessError::NotUtf8 {
                path: path.display().to_string(),
            };
            return self.skip_all(ctx.job, &err);
        };

        let (processed, mut report) = self.process_text(&original, ctx);
        if processed == original {
            return report;
        }

        if let Err(err) = write_atomically(path, &processed) {
            tracing::warn!(job = %ctx.job, "Keeping unmodified G-code: {}", err);
            for transform in &mut report.transforms {
                if transform.outcome.is_applied() {
                    transform.outcome = TransformOutcome::Skipped { reason: err.to_string() };
                }
            }
        }
        report
    }

    fn skip_all(&self, job: &JobId, err: &PostProcessError) -> PostProcessReport {
        let mut report = PostProcessReport::default();
        if self.config.start_sequence != StartSequenceMode::Off {
            let outcome = TransformOutcome::Skipped {
                reason: err.to_string(),
            };
            record(&mut report, job, START_SEQUENCE, outcome);
        }
        if self.config.remove_skirt {
            let outcome = TransformOutcome::Skipped {
                reason: err.to_string(),
            };
            record(&mut report, job, REGION_FILTER, outcome);
        }
        report
    }
}

fn record(
    report: &mut PostProcessReport,
    job: &JobId,
    name: &'static str,
    outcome: TransformOutcome,
) {
    match &outcome {
        TransformOutcome::Applied { detail } => {
            tracing::info!(job = %job, transform = name, "{}", detail)
        }
        TransformOutcome::Unchanged => {
            tracing::debug!(job = %job, transform = name, "nothing to change")
        }
        TransformOutcome::Skipped { reason } => {
            tracing::warn!(job = %job, transform = name, "transformation skipped: {}", reason)
        }
    }
    report.transforms.push(TransformRecord { name, outcome });
}

fn write_atomically(path: &Path, content: &str) -> Result<(), PostProcessError> {
    let tmp = path.with_extension("gcode.tmp");
    let to_err = |source| PostProcessError::Write {
        path: path.display().to_string(),
        source,
    };
    fs::write(&tmp, content).map_err(to_err)?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        to_err(source)
    })
}
