//! Finalize module
//!
//! Compilation entry points: one component, a whole program, and the JSON
//! bridge used by the optional NAPI binding.

#[cfg(feature = "napi")]
use napi_derive::napi;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::IncrementalCache;
use crate::codegen::generate_module;
use crate::component::validate_composition;
use crate::lifecycle::{plan_component, ComponentPlan};
use crate::options::{CompileOptions, RuntimeOptions};
use crate::runtime::Program;
use crate::validate::{get_guarantee, ComponentIR, CompileError, Diagnostic, ERR_INVALID_INPUT};

/// What a bundler needs to know about a compiled component without reading
/// its code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentManifest {
    pub component: String,
    /// Prop names the component accepts: value props, then callbacks.
    pub exported: Vec<String>,
    /// Dependency set of every derived declaration.
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Derived declarations in evaluation order.
    pub order: Vec<String>,
    /// Nested component names, first use first.
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResult {
    pub code: String,
    pub manifest: ComponentManifest,
    pub plan: ComponentPlan,
}

fn manifest(plan: &ComponentPlan) -> ComponentManifest {
    let mut children: Vec<String> = Vec::new();
    for child in &plan.children {
        if !children.contains(&child.component) {
            children.push(child.component.clone());
        }
    }
    ComponentManifest {
        component: plan.name.clone(),
        exported: plan.exported(),
        dependencies: plan
            .derived
            .iter()
            .map(|d| (d.name.clone(), d.dependencies.clone()))
            .collect(),
        order: plan.derived.iter().map(|d| d.name.clone()).collect(),
        children,
    }
}

/// Compile one component to its lifecycle plan and JavaScript module.
pub fn compile_component(
    ir: &ComponentIR,
    options: &CompileOptions,
) -> Result<CompileResult, CompileError> {
    let cached = options.cache_dir.as_deref().and_then(|dir| {
        let hash = IncrementalCache::compute_hash(ir, options)?;
        Some((IncrementalCache::new(dir), hash))
    });
    if let Some((cache, hash)) = &cached {
        if let Some(result) = cache.get(ir, hash) {
            tracing::debug!(component = %ir.name, "cache hit");
            return Ok(result);
        }
    }

    let plan = plan_component(ir)?;
    let code = generate_module(&plan, options);
    tracing::debug!(component = %plan.name, bytes = code.len(), "generated module");

    let result = CompileResult {
        code,
        manifest: manifest(&plan),
        plan,
    };
    if let Some((cache, hash)) = &cached {
        cache.set(ir, hash, &result);
    }
    Ok(result)
}

/// Every component of a program, compiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramOutput {
    pub components: Vec<CompileResult>,
    pub runtime: RuntimeOptions,
}

impl ProgramOutput {
    pub fn get(&self, name: &str) -> Option<&CompileResult> {
        self.components.iter().find(|c| c.plan.name == name)
    }

    /// Runtime program over the compiled plans.
    pub fn program(&self) -> Program {
        Program::new(
            self.components.iter().map(|c| c.plan.clone()).collect(),
            self.runtime,
        )
    }
}

/// Compile a set of components that may nest each other.
///
/// Components compile in parallel; the first failure in input order is
/// reported.
pub fn compile_program(
    components: Vec<ComponentIR>,
    options: &CompileOptions,
) -> Result<ProgramOutput, CompileError> {
    validate_composition(&components)?;

    let results: Vec<Result<CompileResult, CompileError>> = components
        .par_iter()
        .map(|ir| compile_component(ir, options))
        .collect();
    let components = results.into_iter().collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(components = components.len(), "compiled program");
    Ok(ProgramOutput {
        components,
        runtime: options.runtime(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum BridgeOutput<T> {
    Ok { result: T },
    Error { diagnostic: Diagnostic },
}

fn input_error(file: &str, what: &str, err: serde_json::Error) -> Diagnostic {
    Diagnostic {
        code: ERR_INVALID_INPUT.to_string(),
        message: format!("Invalid {}: {}", what, err),
        guarantee: get_guarantee(ERR_INVALID_INPUT).to_string(),
        file: file.to_string(),
        hints: vec![],
    }
}

fn parse_options(options_json: &str) -> Result<CompileOptions, Diagnostic> {
    if options_json.trim().is_empty() {
        return Ok(CompileOptions::default());
    }
    serde_json::from_str(options_json).map_err(|e| input_error("", "options", e))
}

fn to_json<T: Serialize>(output: BridgeOutput<T>) -> String {
    serde_json::to_string(&output).unwrap_or_else(|e| {
        format!(
            r#"{{"status":"error","diagnostic":{{"code":"{}","message":"cannot serialize result: {}","guarantee":"","file":"","hints":[]}}}}"#,
            ERR_INVALID_INPUT,
            e.to_string().replace('"', "'")
        )
    })
}

/// Compile one component given as JSON. Always returns a JSON document with
/// `status` set to `ok` or `error`.
pub fn compile_component_json(ir_json: &str, options_json: &str) -> String {
    let output = parse_options(options_json).and_then(|options| {
        let ir: ComponentIR = serde_json::from_str(ir_json)
            .map_err(|e| input_error(&options.file_path, "component IR", e))?;
        let file = if ir.file_path.is_empty() {
            options.file_path.clone()
        } else {
            ir.file_path.clone()
        };
        compile_component(&ir, &options).map_err(|e| e.to_diagnostic(&file))
    });
    to_json(match output {
        Ok(result) => BridgeOutput::Ok { result },
        Err(diagnostic) => BridgeOutput::Error { diagnostic },
    })
}

/// Compile a JSON array of components. Same envelope as
/// [`compile_component_json`].
pub fn compile_program_json(components_json: &str, options_json: &str) -> String {
    let output = parse_options(options_json).and_then(|options| {
        let components: Vec<ComponentIR> = serde_json::from_str(components_json)
            .map_err(|e| input_error(&options.file_path, "program IR", e))?;
        compile_program(components, &options).map_err(|e| e.to_diagnostic(&options.file_path))
    });
    to_json(match output {
        Ok(result) => BridgeOutput::Ok { result },
        Err(diagnostic) => BridgeOutput::Error { diagnostic },
    })
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_component_native(ir_json: String, options_json: Option<String>) -> String {
    compile_component_json(&ir_json, options_json.as_deref().unwrap_or(""))
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_program_native(components_json: String, options_json: Option<String>) -> String {
    compile_program_json(&components_json, options_json.as_deref().unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: &str = r#"{
        "name": "Counter",
        "filePath": "src/Counter.comp",
        "states": [{ "name": "counter", "init": "0" }],
        "derived": [
            { "name": "quadruple", "body": "double * 2" },
            { "name": "double", "body": "counter * 2", "dependencies": ["counter"] }
        ],
        "handlers": [{ "name": "increment", "body": "() => counter++" }],
        "nodes": [{ "type": "expression", "expression": "quadruple" }]
    }"#;

    #[test]
    fn test_json_bridge_ok() {
        let out: serde_json::Value =
            serde_json::from_str(&compile_component_json(COUNTER, "")).unwrap();
        assert_eq!(out["status"], "ok");
        assert_eq!(
            out["result"]["manifest"]["order"],
            serde_json::json!(["double", "quadruple"])
        );
        assert!(out["result"]["code"]
            .as_str()
            .unwrap()
            .contains("export default function Counter()"));
    }

    #[test]
    fn test_json_bridge_reports_diagnostics() {
        let ir = r#"{ "name": "Broken", "nodes": [{ "type": "expression", "expression": "nope" }] }"#;
        let out: serde_json::Value =
            serde_json::from_str(&compile_component_json(ir, r#"{"filePath": "Broken.comp"}"#))
                .unwrap();
        assert_eq!(out["status"], "error");
        assert_eq!(out["diagnostic"]["code"], "C-ERR-SCOPE-001");
        assert_eq!(out["diagnostic"]["file"], "Broken.comp");

        let out: serde_json::Value =
            serde_json::from_str(&compile_component_json("{", "")).unwrap();
        assert_eq!(out["diagnostic"]["code"], ERR_INVALID_INPUT);
    }

    #[test]
    fn test_program_reports_first_failure_in_input_order() {
        let components: Vec<ComponentIR> = serde_json::from_str(
            r#"[
                { "name": "Good" },
                { "name": "First", "nodes": [{ "type": "expression", "expression": "a" }] },
                { "name": "Second", "nodes": [{ "type": "expression", "expression": "b" }] }
            ]"#,
        )
        .unwrap();
        match compile_program(components, &CompileOptions::default()) {
            Err(CompileError::UnresolvedReference { name, .. }) => assert_eq!(name, "a"),
            other => panic!("unexpected {:?}", other.map(|o| o.components.len())),
        }
    }

    #[test]
    fn test_cache_dir_serves_second_compile() {
        let dir = tempfile::tempdir().unwrap();
        let options = CompileOptions {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let ir: ComponentIR = serde_json::from_str(COUNTER).unwrap();
        let first = compile_component(&ir, &options).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        let second = compile_component(&ir, &options).unwrap();
        assert_eq!(first.code, second.code);
    }
}
