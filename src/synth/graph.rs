//! Dependency graph of a template: reference extraction, dangling-reference checks, and
//! deployment ordering.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde_json::Value;

use super::template::Template;
use super::SynthError;

/// Logical ids a value refers to through `Ref`, `Fn::GetAtt`, or `Fn::Sub` placeholders.
///
/// Pseudo parameters (`AWS::*`) are skipped.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    collect_references(value, &BTreeSet::new(), &mut found);
    found
}

fn collect_references(value: &Value, locals: &BTreeSet<String>, found: &mut BTreeSet<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_references(item, locals, found);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                insert_target(target, locals, found);
            }
            match map.get("Fn::GetAtt") {
                Some(Value::Array(args)) => {
                    if let Some(Value::String(target)) = args.first() {
                        insert_target(target, locals, found);
                    }
                }
                Some(Value::String(dotted)) => {
                    if let Some((target, _)) = dotted.split_once('.') {
                        insert_target(target, locals, found);
                    }
                }
                _ => {}
            }
            match map.get("Fn::Sub") {
                Some(Value::String(template)) => {
                    collect_sub_placeholders(template, locals, found);
                }
                Some(Value::Array(args)) => {
                    let mut scoped = locals.clone();
                    if let Some(Value::Object(variables)) = args.get(1) {
                        scoped.extend(variables.keys().cloned());
                        for variable in variables.values() {
                            collect_references(variable, locals, found);
                        }
                    }
                    if let Some(Value::String(template)) = args.first() {
                        collect_sub_placeholders(template, &scoped, found);
                    }
                }
                _ => {}
            }
            for (key, nested) in map {
                if key != "Ref" && key != "Fn::GetAtt" && key != "Fn::Sub" {
                    collect_references(nested, locals, found);
                }
            }
        }
        _ => {}
    }
}

fn collect_sub_placeholders(template: &str, locals: &BTreeSet<String>, found: &mut BTreeSet<String>) {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let placeholder = &after[..end];
        // `${!Literal}` escapes a placeholder.
        if !placeholder.starts_with('!') {
            let target = placeholder.split('.').next().unwrap_or(placeholder);
            insert_target(target, locals, found);
        }
        rest = &after[end + 1..];
    }
}

fn insert_target(target: &str, locals: &BTreeSet<String>, found: &mut BTreeSet<String>) {
    if !target.starts_with("AWS::") && !locals.contains(target) {
        found.insert(target.to_string());
    }
}

/// Resource-to-resource edges: each resource maps to the resources it depends on.
///
/// References to parameters are validated but are not edges. Any reference to
/// a name that is neither a resource nor a parameter is reported as
/// [`SynthError::DanglingReference`], including references from outputs.
pub fn dependencies(template: &Template) -> Result<BTreeMap<String, BTreeSet<String>>, SynthError> {
    let resolve = |from: &str, target: &str| -> Result<bool, SynthError> {
        if template.resources.contains_key(target) {
            Ok(true)
        } else if template.parameters.contains_key(target) {
            Ok(false)
        } else {
            Err(SynthError::DanglingReference {
                from: from.to_string(),
                target: target.to_string(),
            })
        }
    };

    let mut edges = BTreeMap::new();
    for (id, resource) in &template.resources {
        let mut targets = BTreeSet::new();
        let mut referenced = BTreeSet::new();
        for value in resource.properties.values() {
            referenced.extend(references(value));
        }
        referenced.extend(resource.depends_on.iter().cloned());

        for target in referenced {
            if resolve(id, &target)? {
                targets.insert(target);
            }
        }
        edges.insert(id.clone(), targets);
    }

    for (name, output) in &template.outputs {
        for target in references(&output.value) {
            resolve(&format!("output {name}"), &target)?;
        }
    }

    Ok(edges)
}

/// Order in which resources can be created: every resource appears after
/// everything it depends on. Ties are broken by logical id.
pub fn deployment_order(template: &Template) -> Result<Vec<String>, SynthError> {
    let edges = dependencies(template)?;

    let mut remaining: BTreeMap<&str, usize> = edges
        .iter()
        .map(|(id, targets)| (id.as_str(), targets.len()))
        .collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, targets) in &edges {
        for target in targets {
            dependents.entry(target.as_str()).or_default().push(id.as_str());
        }
    }

    let mut ready: VecDeque<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(edges.len());

    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        remaining.remove(id);
        let Some(waiting) = dependents.get(id) else {
            continue;
        };
        let mut unblocked = Vec::new();
        for dependent in waiting {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    unblocked.push(*dependent);
                }
            }
        }
        unblocked.sort_unstable();
        ready.extend(unblocked);
    }

    if remaining.is_empty() {
        Ok(order)
    } else {
        Err(SynthError::DependencyCycle(
            remaining.keys().map(|id| id.to_string()).collect(),
        ))
    }
}
