//! Run configuration: an optional JSON file merged with command-line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use clap::Args;
use serde::Deserialize;

use passthrough_engine::{ContextMap, Template, TemplateBuilder};

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Inputs shared by `render` and `check`.
#[derive(Args, Debug, Default, Clone)]
pub struct InputArgs {
    /// Type template to resolve
    #[arg(short, long)]
    pub template: Option<PathBuf>,

    /// Source document as MONIKER=PATH; repeat a moniker to build a group
    #[arg(short, long = "source", value_name = "MONIKER=PATH")]
    pub sources: Vec<String>,

    /// Context entry as KEY=VALUE; VALUE is read as JSON when it parses
    #[arg(short, long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,

    /// Keep template comments in the output label
    #[arg(long)]
    pub keep_comments: bool,

    /// Skip the export structure check
    #[arg(long)]
    pub skip_structure_check: bool,

    /// Do not expose the template under the `template` moniker
    #[arg(long)]
    pub no_template_source: bool,

    /// JSON run configuration; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

/// A moniker bound to one document or an ordered group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SourceEntry {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl SourceEntry {
    fn into_paths(self) -> Vec<PathBuf> {
        match self {
            SourceEntry::One(p) => vec![p],
            SourceEntry::Many(ps) => ps,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub template: Option<PathBuf>,
    pub sources: BTreeMap<String, SourceEntry>,
    pub context: ContextMap,
    pub out: Option<PathBuf>,
    pub filename: Option<String>,
    pub keep_comments: bool,
    pub skip_structure_check: bool,
    pub no_template_source: bool,
}

impl RunConfig {
    /// Read `path`; relative paths inside it resolve against its directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run config {}", path.display()))?;
        let mut config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("invalid run config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(t) = self.template.as_mut() {
            join(t);
        }
        if let Some(o) = self.out.as_mut() {
            join(o);
        }
        for entry in self.sources.values_mut() {
            match entry {
                SourceEntry::One(p) => join(p),
                SourceEntry::Many(ps) => ps.iter_mut().for_each(join),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Merged run
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
pub struct Run {
    pub template: PathBuf,
    pub sources: Vec<(String, Vec<PathBuf>)>,
    pub context: ContextMap,
    pub out: Option<PathBuf>,
    pub filename: Option<String>,
    pub keep_comments: bool,
    pub skip_structure_check: bool,
    pub no_template_source: bool,
}

impl Run {
    /// Layer `args` over the config file named by `--config`, if any.
    pub fn from_args(args: InputArgs) -> anyhow::Result<Self> {
        let config = match &args.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        Self::merge(config, args)
    }

    pub fn merge(config: RunConfig, args: InputArgs) -> anyhow::Result<Self> {
        let Some(template) = args.template.or(config.template) else {
            bail!("no template given; pass --template or set \"template\" in the run config");
        };

        let mut sources: Vec<(String, Vec<PathBuf>)> = config
            .sources
            .into_iter()
            .map(|(moniker, entry)| (moniker, entry.into_paths()))
            .collect();
        let mut overridden: Vec<String> = Vec::new();
        for pair in &args.sources {
            let (moniker, path) = parse_pair(pair, "--source")?;
            if !overridden.contains(&moniker) {
                sources.retain(|(m, _)| *m != moniker);
                sources.push((moniker.clone(), Vec::new()));
                overridden.push(moniker.clone());
            }
            if let Some((_, paths)) = sources.iter_mut().find(|(m, _)| *m == moniker) {
                paths.push(PathBuf::from(path));
            }
        }

        let mut context = config.context;
        for pair in &args.context {
            let (key, value) = parse_pair(pair, "--context")?;
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            context.insert(key, value);
        }

        Ok(Run {
            template,
            sources,
            context,
            out: config.out,
            filename: config.filename,
            keep_comments: args.keep_comments || config.keep_comments,
            skip_structure_check: args.skip_structure_check || config.skip_structure_check,
            no_template_source: args.no_template_source || config.no_template_source,
        })
    }

    pub fn builder(&self) -> TemplateBuilder {
        let mut builder = Template::builder()
            .template(self.template.clone())
            .context_map(self.context.clone())
            .keep_template_comments(self.keep_comments)
            .skip_structure_check(self.skip_structure_check)
            .include_template_source(!self.no_template_source);
        for (moniker, paths) in &self.sources {
            builder = match paths.as_slice() {
                [single] => builder.source(moniker.clone(), single.clone()),
                many => builder.source_group(moniker.clone(), many.to_vec()),
            };
        }
        builder
    }
}

fn parse_pair(pair: &str, flag: &str) -> anyhow::Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => bail!("{flag} expects KEY=VALUE, got '{pair}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(sources: &[&str], context: &[&str]) -> InputArgs {
        InputArgs {
            template: Some("t.xml".into()),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            context: context.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn repeated_moniker_builds_group() {
        let run = Run::merge(
            RunConfig::default(),
            args(&["obs=a.xml", "raw=r.xml", "obs=b.xml"], &[]),
        )
        .unwrap();
        assert_eq!(
            run.sources,
            vec![
                ("obs".to_string(), vec![PathBuf::from("a.xml"), PathBuf::from("b.xml")]),
                ("raw".to_string(), vec![PathBuf::from("r.xml")]),
            ]
        );
    }

    #[test]
    fn context_values_parse_as_json_when_possible() {
        let run = Run::merge(RunConfig::default(), args(&[], &["n=3", "mission=TGO", "s=\"x\""]))
            .unwrap();
        assert_eq!(run.context["n"], serde_json::json!(3));
        assert_eq!(run.context["mission"], serde_json::json!("TGO"));
        assert_eq!(run.context["s"], serde_json::json!("x"));
    }

    #[test]
    fn flags_override_config() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "template": "from_config.xml",
                "sources": {"obs": ["c1.xml", "c2.xml"], "raw": "raw.xml"},
                "context": {"mission": "TGO", "orbit": 1},
                "keep_comments": true
            }"#,
        )
        .unwrap();
        let run = Run::merge(config, args(&["obs=flag.xml"], &["orbit=2"])).unwrap();
        assert_eq!(run.template, PathBuf::from("t.xml"));
        assert_eq!(
            run.sources,
            vec![
                ("raw".to_string(), vec![PathBuf::from("raw.xml")]),
                ("obs".to_string(), vec![PathBuf::from("flag.xml")]),
            ]
        );
        assert_eq!(run.context["mission"], serde_json::json!("TGO"));
        assert_eq!(run.context["orbit"], serde_json::json!(2));
        assert!(run.keep_comments);
    }

    #[test]
    fn config_paths_resolve_against_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"template": "t.xml", "sources": {"raw": "in/raw.xml"}, "out": "labels"}"#,
        )
        .unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.template, Some(dir.path().join("t.xml")));
        assert_eq!(config.out, Some(dir.path().join("labels")));
        assert_eq!(
            config.sources["raw"],
            SourceEntry::One(dir.path().join("in/raw.xml"))
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Run::merge(RunConfig::default(), InputArgs::default()).is_err());
        assert!(Run::merge(RunConfig::default(), args(&["no-equals"], &[])).is_err());
        assert!(Run::merge(RunConfig::default(), args(&["=x.xml"], &[])).is_err());
        assert!(serde_json::from_str::<RunConfig>(r#"{"unknown": 1}"#).is_err());
    }
}
