//! # inspirec
//!
//! The driver binary: reads serialized source ASTs, runs the front end
//! conversion per translation unit, marks SCoP regions, and emits the
//! target type fragments of the program.

mod cli;

use std::error::Error;
use std::fs;

use colored::Colorize;
use log::{error, info};

use inspire::analysis;
use inspire::backend::{TargetCode, TypeManager};
use inspire::frontend::{self, ast::TranslationUnit, ConversionSetup};
use inspire::ir::printer;

use cli::Cli;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::init();

    simple_logger::init_with_level((&args.verbosity).into()).unwrap();

    let mut setup = ConversionSetup {
        include_paths: args.include_paths.clone(),
        definitions: args.definitions.clone(),
        kidnapped_headers: args.kidnapped_headers.clone(),
        ..Default::default()
    };
    for pattern in &args.intercept {
        setup.intercept_patterns.push(regex::Regex::new(pattern)?);
    }

    let mut fragment_roots = vec![];
    let mut types = TypeManager::new();
    let mut failures = 0usize;

    for file in &args.files {
        let content = fs::read_to_string(file)?;
        let unit: TranslationUnit = serde_json::from_str(&content)?;

        // a failing unit is reported; its siblings are still attempted
        let mut converted = match frontend::convert(&unit, &setup) {
            Ok(converted) => converted,
            Err(diagnostic) => {
                error!("{}: {diagnostic}", "conversion failed".red());
                failures += 1;
                continue;
            }
        };

        analysis::mark_scops(&mut converted.builder.mgr, converted.program);

        if args.dump_ir {
            let normalized = printer::normalize(&mut converted.builder.mgr, converted.program);
            info!(
                "IR of '{}':\n{}",
                unit.name,
                printer::print(&converted.builder.mgr, normalized)
            );
        }

        let mgr = &mut converted.builder.mgr;
        for entry in mgr.children(converted.program) {
            let Some(fn_ty) = mgr.expr_type(entry) else {
                continue;
            };
            match types.resolve(mgr, fn_ty) {
                Ok(info) => fragment_roots.extend(info.definition.or(info.declaration)),
                Err(diagnostic) => {
                    error!("{}: {diagnostic}", "backend lowering failed".red());
                    failures += 1;
                }
            }
        }
    }

    let code = TargetCode::new(&types.fragments, &fragment_roots);
    let emitted = code.emit(&types.fragments);
    match &args.output {
        Some(path) => fs::write(path, emitted)?,
        None => print!("{emitted}"),
    }

    if failures > 0 {
        error!("{failures} unit(s) failed to convert");
        std::process::exit(1);
    }
    Ok(())
}
