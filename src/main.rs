use std::{env, path::PathBuf, process};

use anyhow::Context;
use vrc2vrm::convert::{Collaborators, ConversionInput, analyze_source, convert_avatar};
use vrc2vrm::logging::{JsonLineSink, LogLevel, StderrSink, init_logging};
use vrc2vrm::project::{
    ProjectSettings, load_project_settings, load_source_document, save_project_settings,
};

const USAGE: &str = "Usage: vrc2vrm [<source.json>] [<output.vrm>] [--project <settings.json>] \
[--save-project <settings.json>] [--keep-unused-shape-keys] [--analyze]";

#[derive(Debug, Default)]
struct CliArgs {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    project: Option<PathBuf>,
    save_project: Option<PathBuf>,
    keep_unused_shape_keys: bool,
    analyze: bool,
}

fn main() {
    configure_logging();

    let Some(args) = parse_args(env::args().skip(1)) else {
        eprintln!("{USAGE}");
        process::exit(2);
    };

    let settings = match resolve_settings(&args) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(1);
        }
    };
    let has_output = settings.output_path.is_some() || args.analyze;
    if settings.input_path.is_none() || !has_output {
        eprintln!("{USAGE}");
        process::exit(2);
    }

    if let Err(err) = run(&args, settings) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn configure_logging() {
    let min_level = env::var("VRC2VRM_LOG")
        .ok()
        .and_then(|value| LogLevel::parse(&value))
        .unwrap_or(LogLevel::Info);
    let json = env::var("VRC2VRM_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        init_logging(Box::new(JsonLineSink { min_level }));
    } else {
        init_logging(Box::new(StderrSink { min_level }));
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--keep-unused-shape-keys" => parsed.keep_unused_shape_keys = true,
            "--analyze" => parsed.analyze = true,
            "--project" => parsed.project = Some(PathBuf::from(args.next()?)),
            "--save-project" => parsed.save_project = Some(PathBuf::from(args.next()?)),
            flag if flag.starts_with("--") => return None,
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let mut positional = positional.into_iter();
    parsed.input = positional.next();
    parsed.output = positional.next();
    if positional.next().is_some() {
        return None;
    }
    Some(parsed)
}

/// Merge command-line arguments over the optional project file.
fn resolve_settings(args: &CliArgs) -> anyhow::Result<ProjectSettings> {
    let mut settings = match &args.project {
        Some(path) => load_project_settings(path)?,
        None => ProjectSettings::default(),
    };
    if args.input.is_some() {
        settings.input_path.clone_from(&args.input);
    }
    if args.output.is_some() {
        settings.output_path.clone_from(&args.output);
    }
    if args.keep_unused_shape_keys {
        settings.options.keep_unused_shape_keys = true;
    }
    Ok(settings)
}

fn run(args: &CliArgs, settings: ProjectSettings) -> anyhow::Result<()> {
    if let Some(path) = &args.save_project {
        save_project_settings(path, &settings)?;
        println!("Saved project settings to {}", path.display());
    }

    let input = settings.input_path.context("no source document given")?;
    let document = load_source_document(&input)?;
    let options = settings.options;

    if args.analyze {
        let report = analyze_source(&document.rig, &document.expressions, &options);
        println!("Model: {}", report.model_name);
        println!(
            "Nodes: {}, Renderers: {}, Materials: {}, Shape keys: {}",
            report.node_count, report.renderer_count, report.material_count, report.shape_key_count
        );
        println!("Mapped bones: {}", report.mapped_bones.len());
        for issue in &report.issues {
            println!("{:?} {}: {}", issue.severity, issue.code, issue.message);
        }
        if report.has_errors() {
            anyhow::bail!("analysis found errors");
        }
        return Ok(());
    }

    let output = settings.output_path.context("no output path given")?;
    let report = convert_avatar(
        ConversionInput {
            rig: &document.rig,
            meta: &document.meta,
            expressions: &document.expressions,
        },
        &output,
        &options,
        Collaborators::default(),
    )?;

    println!("Model: {}", report.model_name);
    println!("Output: {} ({} bytes)", report.output_path.display(), report.output_bytes);
    println!(
        "Submeshes: {}, Duplicated materials: {}",
        report.combined_submesh_count, report.duplicated_material_count
    );
    println!(
        "Spring chains: {}, Collider groups: {} ({} pruned)",
        report.spring_chain_count, report.collider_group_count, report.pruned_collider_group_count
    );
    if !report.converted_collider_anchors.is_empty() {
        println!("Converted colliders on: {}", report.converted_collider_anchors.join(", "));
    }
    println!("Shape keys kept: {}", report.retained_shape_keys.join(", "));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn given_input_output_and_flag_when_parsing_then_all_are_captured() {
        let parsed = parse_args(args(&["avatar.json", "out.vrm", "--keep-unused-shape-keys"]))
            .expect("valid arguments");

        assert_eq!(parsed.input, Some(PathBuf::from("avatar.json")));
        assert_eq!(parsed.output, Some(PathBuf::from("out.vrm")));
        assert!(parsed.keep_unused_shape_keys);
        assert!(!parsed.analyze);
    }

    #[test]
    fn given_analyze_without_output_when_parsing_then_arguments_are_accepted() {
        let parsed = parse_args(args(&["--analyze", "avatar.json"])).expect("valid arguments");

        assert!(parsed.analyze);
        assert_eq!(parsed.output, None);
    }

    #[test]
    fn given_unknown_flag_or_extra_positional_when_parsing_then_usage_is_required() {
        assert!(parse_args(args(&["avatar.json", "out.vrm", "--verbose"])).is_none());
        assert!(parse_args(args(&["a.json", "b.vrm", "c.vrm"])).is_none());
        assert!(parse_args(args(&["a.json", "--project"])).is_none());
    }

    #[test]
    fn given_project_file_when_resolving_then_arguments_override_its_paths() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let project = scratch.path().join("project.json");
        let mut stored = ProjectSettings {
            input_path: Some(PathBuf::from("stored.json")),
            output_path: Some(PathBuf::from("stored.vrm")),
            ..ProjectSettings::default()
        };
        stored.options.texture_max_size = 512;
        save_project_settings(&project, &stored).expect("save");
        let parsed = parse_args(args(&[
            "--project",
            project.to_str().expect("utf-8 path"),
            "cli.json",
            "--keep-unused-shape-keys",
        ]))
        .expect("valid arguments");

        let settings = resolve_settings(&parsed).expect("resolves");

        assert_eq!(settings.input_path, Some(PathBuf::from("cli.json")));
        assert_eq!(settings.output_path, Some(PathBuf::from("stored.vrm")));
        assert_eq!(settings.options.texture_max_size, 512);
        assert!(settings.options.keep_unused_shape_keys);
    }
}
