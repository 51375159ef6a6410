//! Declarative runbook documents: YAML front-matter with an ordered workflow,
//! free-form markdown body. Parsed once at startup; every reference is
//! validated against the tool registry so a bad document fails the process
//! instead of a workflow.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use crate::router::RunbookId;
use crate::tools::{self, ToolName};

/// Parsed gate reference: `<alias>.<field>` into the tool-results map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRef {
    pub alias: String,
    pub field: String,
}

impl std::fmt::Display for GateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.alias, self.field)
    }
}

/// One workflow step. `tool` is resolved from the action id at load time.
#[derive(Debug, Clone)]
pub struct Step {
    pub action_id: String,
    pub tool: ToolName,
    pub gates: Vec<GateRef>,
}

#[derive(Debug, Clone)]
pub struct Runbook {
    pub id: RunbookId,
    pub alert_name: String,
    pub title: String,
    pub description: String,
    pub workflow: Vec<Step>,
    pub fallback_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrontMatter {
    runbook_id: Option<String>,
    #[serde(default)]
    alertname: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    workflow: Vec<StepDoc>,
    #[serde(default)]
    fallback_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StepDoc {
    action_id: String,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    when_all: Option<Vec<String>>,
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses `<alias>.<field>` where both segments are identifier-like.
pub fn parse_gate(expr: &str) -> Result<GateRef> {
    let (alias, field) = expr
        .split_once('.')
        .ok_or_else(|| anyhow!("gate {:?} is not of the form alias.field", expr))?;
    if !is_identifier(alias) || !is_identifier(field) {
        bail!("gate {:?} has a non-identifier segment", expr);
    }
    if !tools::known_alias(alias) {
        bail!("gate {:?} references unknown tool alias {:?}", expr, alias);
    }
    Ok(GateRef {
        alias: alias.to_string(),
        field: field.to_string(),
    })
}

fn split_front_matter(content: &str) -> Result<&str> {
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| anyhow!("missing front-matter opening delimiter"))?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest
        .find("\n---")
        .ok_or_else(|| anyhow!("missing front-matter closing delimiter"))?;
    Ok(&rest[..end])
}

impl Runbook {
    /// Parses one runbook document, failing fast on anything the engine could
    /// not execute later.
    pub fn parse(content: &str) -> Result<Runbook> {
        let front = split_front_matter(content)?;
        let doc: FrontMatter = serde_yaml::from_str(front).context("invalid front-matter")?;
        let raw_id = doc
            .runbook_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("runbook_id is missing"))?;
        let id = RunbookId::parse(&raw_id)
            .ok_or_else(|| anyhow!("unrecognized runbook_id {:?}", raw_id))?;

        let mut workflow = Vec::with_capacity(doc.workflow.len());
        for step in doc.workflow {
            let tool = tools::expected_tool(&step.action_id).ok_or_else(|| {
                anyhow!("{}: unknown action_id {:?}", raw_id, step.action_id)
            })?;
            let mut gates = Vec::new();
            if let Some(expr) = &step.when {
                gates.push(
                    parse_gate(expr).with_context(|| format!("{}: step {}", raw_id, step.action_id))?,
                );
            }
            if let Some(exprs) = &step.when_all {
                for expr in exprs {
                    gates.push(
                        parse_gate(expr)
                            .with_context(|| format!("{}: step {}", raw_id, step.action_id))?,
                    );
                }
            }
            workflow.push(Step {
                action_id: step.action_id,
                tool,
                gates,
            });
        }

        Ok(Runbook {
            id,
            alert_name: doc.alertname,
            title: doc.title,
            description: doc.description,
            workflow,
            fallback_image: doc.fallback_image,
        })
    }
}

/// Immutable runbook index, built once at startup.
#[derive(Debug, Default)]
pub struct RunbookTable {
    by_id: HashMap<RunbookId, Runbook>,
}

impl RunbookTable {
    pub fn from_documents<'a>(docs: impl IntoIterator<Item = (String, &'a str)>) -> Result<Self> {
        let mut by_id = HashMap::new();
        for (name, content) in docs {
            let runbook =
                Runbook::parse(content).with_context(|| format!("failed to load {}", name))?;
            if by_id.insert(runbook.id, runbook).is_some() {
                bail!("duplicate runbook id in {}", name);
            }
        }
        Ok(RunbookTable { by_id })
    }

    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut docs = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read runbook dir {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            docs.push((path.display().to_string(), content));
        }
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_documents(docs.iter().map(|(n, c)| (n.clone(), c.as_str())))
    }

    pub fn get(&self, id: RunbookId) -> Option<&Runbook> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = RunbookId> + '_ {
        self.by_id.keys().copied()
    }
}
