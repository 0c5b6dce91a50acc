//! Pass 5: Lowering report -- the rewritten program text plus one entry
//! per lowered context, innermost first, as JSON with sorted keys.

use crate::lower::Lowered;
use crate::pass3_resolve::{Dependency, DependencyTable};
use crate::pass4_lower::LoweredContext;
use crate::scope::BindingSite;
use serde_json::{json, Map, Value};

pub fn serialize_report(lowered: &Lowered) -> Value {
    let contexts: Vec<Value> = lowered.contexts.iter().map(context_report).collect();

    let mut report = Map::new();
    report.insert("contexts".to_owned(), Value::Array(contexts));
    report.insert("file".to_owned(), Value::String(lowered.program.file.clone()));
    report.insert("kind".to_owned(), Value::String("LoweringReport".to_owned()));
    report.insert("program".to_owned(), Value::String(lowered.program.to_string()));
    Value::Object(report)
}

pub fn context_report(lc: &LoweredContext) -> Value {
    let r = &lc.record;
    json!({
        "dependencies": dependency_reports(&lc.dependencies),
        "depth": r.depth,
        "explicit": r.explicit,
        "id": r.id.0,
        "kind": r.kind.as_str(),
        "parent": r.parent.map(|p| p.0),
        "provenance": {
            "column": r.prov.column,
            "file": r.prov.file,
            "line": r.prov.line,
        },
    })
}

fn dependency_reports(table: &DependencyTable) -> Vec<Value> {
    table.entries().iter().map(dependency_report).collect()
}

fn dependency_report(d: &Dependency) -> Value {
    let binding = match &d.binding {
        BindingSite::Module => json!({ "scope": "module" }),
        BindingSite::Local { context } => json!({
            "context": context.map(|c| c.0),
            "scope": "local",
        }),
        BindingSite::Free => json!({ "scope": "free" }),
    };
    json!({
        "binding": binding,
        "depth": d.key.depth,
        "ident": d.key.ident,
        "nullish": d.key.nullish,
        "occurrences": d.occurrences,
        "slot": d.slot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoweringConfig;
    use crate::lower::lower_source;

    #[test]
    fn report_lists_contexts_innermost_first() {
        let src = "let b = 1;\nlet o = @ => @a + f(@ => @?b);";
        let lowered = lower_source(src, "rep.obs", &LoweringConfig::default()).unwrap();
        let report = serialize_report(&lowered);

        assert_eq!(report["kind"], "LoweringReport");
        assert_eq!(report["file"], "rep.obs");
        let contexts = report["contexts"].as_array().unwrap();
        assert_eq!(contexts.len(), 2);

        let inner = &contexts[0];
        assert_eq!(inner["id"], 1);
        assert_eq!(inner["parent"], 0);
        assert_eq!(inner["depth"], 2);
        assert_eq!(inner["kind"], "arrow");
        assert_eq!(inner["dependencies"][0]["ident"], "b");
        assert_eq!(inner["dependencies"][0]["nullish"], true);
        assert_eq!(inner["dependencies"][0]["binding"]["scope"], "module");

        let outer = &contexts[1];
        assert_eq!(outer["parent"], Value::Null);
        assert_eq!(outer["explicit"], Value::Null);
        assert_eq!(outer["dependencies"][0]["binding"]["scope"], "free");
        assert_eq!(outer["provenance"]["line"], 2);
    }
}
