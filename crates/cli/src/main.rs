use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kube::core::DynamicObject;
use tracing::{info, warn};

use flotilla_core::{gvk_of, FlotillaConfig, GroupScoreReduction};
use flotilla_interpreter::{ConfigurableInterpreter, CustomizationDocument, RuleKind, ScriptEngine, ScriptError};
use flotilla_kubehub::{control_plane_client, DiscoveryResolver, KubeconfigClientFactory, MemoryCache};
use flotilla_objectwatcher::{
    desired_replicas, prune_clusters, sync_to_clusters, ClusterOutcome, ObjectWatcher, OperationResult, SyncAction,
    TypeResolver,
};
use flotilla_scheduler::{ClusterCatalog, PlacementDecision, PlacementPolicy, Scheduler, StaticCatalog};

#[derive(Parser, Debug)]
#[command(name = "flotillactl", version, about = "Flotilla multi-cluster placement CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubeconfig file (default: client discovery rules)
    #[arg(long, env = "FLOTILLA_KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Control plane context
    #[arg(long, env = "FLOTILLA_CONTEXT", global = true)]
    context: Option<String>,

    /// Group score reduction: sum or max
    #[arg(long = "group-score", env = "FLOTILLA_GROUP_SCORE", global = true)]
    group_score: Option<GroupScoreReduction>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute a placement decision from local policy and cluster files
    Schedule(PlacementArgs),
    /// Inspect or edit interpreter rules in a customization document
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Schedule a resource template and write it to the chosen member clusters
    Sync {
        /// Resource template (YAML)
        #[arg(long)]
        template: PathBuf,
        #[command(flatten)]
        placement: PlacementArgs,
        /// Clusters that held the resource before; those no longer selected are cleaned up
        #[arg(long = "previous", value_delimiter = ',')]
        previous: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct PlacementArgs {
    /// Placement policy (YAML): a bare placement or a document with spec.placement
    #[arg(long)]
    policy: PathBuf,
    /// Cluster catalog (YAML list of scored clusters)
    #[arg(long)]
    clusters: PathBuf,
    /// Desired replicas (sync: default is read from the template)
    #[arg(long)]
    replicas: Option<i32>,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// List rule names; with --file, show which are enabled
    List {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print one rule's script
    Get {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        rule: String,
    },
    /// Replace one rule's script; an empty script disables the rule
    Set {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        rule: String,
        #[arg(long, conflicts_with = "script_file", required_unless_present = "script_file")]
        script: Option<String>,
        #[arg(long = "script-file")]
        script_file: Option<PathBuf>,
    },
}

/// Engine for runs with no script runtime attached. Only reached if a customization is loaded.
struct Unscripted;

impl ScriptEngine for Unscripted {
    fn call(&self, _: &str, function: &str, _: &[serde_json::Value], _: usize) -> Result<Vec<serde_json::Value>, ScriptError> {
        Err(ScriptError::Runtime(format!("no script runtime available to run {function}")))
    }
}

fn init_tracing(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::from_str(filter).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(cfg: &FlotillaConfig) {
    if let Some(addr) = cfg.metrics_addr {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.with_http_listener(addr).install() {
            Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
            Err(e) => warn!(error = %e, "failed to install metrics exporter"),
        }
    }
}

fn apply_overrides(cfg: &mut FlotillaConfig, cli: &Cli) {
    if let Some(k) = &cli.kubeconfig { cfg.kubeconfig = Some(k.clone()); }
    if let Some(c) = &cli.context { cfg.context = Some(c.clone()); }
    if let Some(g) = cli.group_score { cfg.group_score = g; }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Accepts either a bare placement or a policy object carrying `spec.placement`.
fn parse_policy(text: &str) -> Result<PlacementPolicy> {
    let value: serde_yaml::Value = serde_yaml::from_str(text).context("parsing policy")?;
    let placement = value.get("spec").and_then(|s| s.get("placement")).cloned().unwrap_or(value);
    serde_yaml::from_value(placement).context("decoding placement")
}

fn schedule(cfg: &FlotillaConfig, args: &PlacementArgs, replicas: i32) -> Result<PlacementDecision> {
    let policy = parse_policy(&read(&args.policy)?)?;
    let catalog = StaticCatalog::from_path(&args.clusters)?;
    let decision = Scheduler::new(cfg.group_score).schedule(&policy, &catalog.snapshot(), replicas)?;
    Ok(decision)
}

fn print_decision(decision: &PlacementDecision, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for (cluster, replicas) in decision.targets() {
                println!("{cluster} • {replicas}");
            }
            println!("total • {}", decision.total());
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(decision)?),
    }
    Ok(())
}

fn rule_named(name: &str) -> Result<RuleKind> {
    RuleKind::get(name).ok_or_else(|| anyhow!("unknown rule {name:?}; known: {}", RuleKind::names().collect::<Vec<_>>().join(", ")))
}

/// One row per rule and document; with no documents, the bare registry in order.
fn rule_rows(docs: &[CustomizationDocument]) -> Vec<(Option<&str>, &'static str, Option<bool>)> {
    if docs.is_empty() {
        return RuleKind::names().map(|n| (None, n, None)).collect();
    }
    docs.iter()
        .flat_map(|d| flotilla_interpreter::RULES.iter().map(move |r| (Some(d.name()), r.name(), Some(r.script(d).is_some()))))
        .collect()
}

/// Rewrite one rule's script inside a customization document.
fn edit_rule(text: &str, rule: RuleKind, script: &str) -> Result<String> {
    let mut doc = CustomizationDocument::from_yaml(text).context("parsing customization")?;
    rule.set_script(&mut doc, script);
    Ok(doc.to_yaml()?)
}

fn run_rules(command: RulesCommand, output: Output) -> Result<()> {
    match command {
        RulesCommand::List { file } => {
            let docs = match file.as_deref() {
                Some(p) => CustomizationDocument::all_from_yaml(&read(p)?).context("parsing customizations")?,
                None => Vec::new(),
            };
            let rows = rule_rows(&docs);
            match output {
                Output::Human => {
                    for (doc, name, enabled) in rows {
                        match (doc, enabled) {
                            (Some(d), Some(true)) => println!("{d} • {name} • enabled"),
                            (Some(d), _) => println!("{d} • {name} • disabled"),
                            (None, _) => println!("{name}"),
                        }
                    }
                }
                Output::Json => {
                    let items: Vec<_> = rows
                        .iter()
                        .map(|(d, n, e)| serde_json::json!({"customization": d, "name": n, "enabled": e}))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&items)?);
                }
            }
        }
        RulesCommand::Get { file, rule } => {
            let rule = rule_named(&rule)?;
            let doc = CustomizationDocument::from_yaml(&read(&file)?)?;
            let script = rule.script(&doc);
            match output {
                Output::Human => match script {
                    Some(s) => println!("{s}"),
                    None => eprintln!("{} is disabled in {}", rule.name(), doc.name()),
                },
                Output::Json => println!("{}", serde_json::json!({"rule": rule.name(), "script": script})),
            }
        }
        RulesCommand::Set { file, rule, script, script_file } => {
            let rule = rule_named(&rule)?;
            let script = match (script, script_file) {
                (Some(s), _) => s,
                (None, Some(p)) => read(&p)?,
                (None, None) => bail!("one of --script or --script-file is required"),
            };
            let updated = edit_rule(&read(&file)?, rule, &script)?;
            std::fs::write(&file, updated).with_context(|| format!("writing {}", file.display()))?;
            info!(rule = rule.name(), file = %file.display(), enabled = !script.is_empty(), "rules: updated");
        }
    }
    Ok(())
}

fn action_label(action: &SyncAction) -> &'static str {
    match action {
        SyncAction::Created => "created",
        SyncAction::Updated(OperationResult::Updated) => "updated",
        SyncAction::Updated(OperationResult::Unchanged) => "unchanged",
        SyncAction::UpToDate => "up-to-date",
        SyncAction::Deleted => "deleted",
    }
}

fn print_outcomes(outcomes: &[ClusterOutcome], output: Output) -> Result<()> {
    match output {
        Output::Human => {
            for o in outcomes {
                match &o.result {
                    Ok(a) => println!("{} • {}", o.cluster, action_label(a)),
                    Err(e) => println!("{} • error: {}", o.cluster, e),
                }
            }
        }
        Output::Json => {
            let items: Vec<_> = outcomes
                .iter()
                .map(|o| match &o.result {
                    Ok(a) => serde_json::json!({"cluster": o.cluster, "action": action_label(a)}),
                    Err(e) => serde_json::json!({"cluster": o.cluster, "error": e.to_string()}),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }
    Ok(())
}

async fn run_sync(cfg: &FlotillaConfig, template: &Path, placement: &PlacementArgs, previous: &[String], output: Output) -> Result<()> {
    let template: DynamicObject = serde_yaml::from_str(&read(template)?).context("parsing template")?;
    let gvk = gvk_of(&template)?;
    let interpreter = Arc::new(ConfigurableInterpreter::new(Arc::new(Unscripted)));

    let replicas = match placement.replicas {
        Some(r) => r,
        None => i32::try_from(desired_replicas(interpreter.as_ref(), &template)?).context("template replicas out of range")?,
    };
    let decision = schedule(cfg, placement, replicas)?;
    info!(cluster_namespace = %cfg.cluster_namespace, clusters = decision.clusters.len(), "sync: scheduled");

    let resolver = Arc::new(DiscoveryResolver::new(control_plane_client(cfg).await?, cfg));
    let mapping = resolver.resolve(&gvk).await?;
    let factory = Arc::new(KubeconfigClientFactory::from_config(cfg));
    let cache = Arc::new(MemoryCache::new());

    let clusters: BTreeSet<&str> = decision.clusters.keys().map(String::as_str).chain(previous.iter().map(String::as_str)).collect();
    let mut watches = Vec::new();
    for cluster in &clusters {
        let client = factory.kube_client(cluster).await?;
        watches.push(cache.spawn_watch(cluster.to_string(), client, mapping.clone()));
    }
    for cluster in &clusters {
        if !cache.wait_synced(cluster, &gvk, cfg.command_timeout).await {
            bail!("cache for cluster {cluster} did not sync within {:?}", cfg.command_timeout);
        }
    }

    let watcher = ObjectWatcher::new(factory, resolver, cache, interpreter.clone());
    let mut outcomes = sync_to_clusters(&watcher, interpreter.as_ref(), &template, &decision).await;
    outcomes.extend(prune_clusters(&watcher, &template, &decision, previous.iter().map(String::as_str)).await);
    for w in watches {
        w.abort();
    }

    print_outcomes(&outcomes, output)?;
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        bail!("{failed} of {} cluster operations failed", outcomes.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = FlotillaConfig::from_env()?;
    apply_overrides(&mut cfg, &cli);
    init_tracing(&cfg.log_filter);
    init_metrics(&cfg);

    match cli.command {
        Commands::Schedule(args) => {
            let replicas = args.replicas.unwrap_or(1);
            info!(replicas, policy = %args.policy.display(), "schedule invoked");
            print_decision(&schedule(&cfg, &args, replicas)?, cli.output)?;
        }
        Commands::Rules { command } => run_rules(command, cli.output)?,
        Commands::Sync { template, placement, previous } => {
            run_sync(&cfg, &template, &placement, &previous, cli.output).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
apiVersion: config.flotilla.io/v1alpha1
kind: ResourceInterpreterCustomization
metadata:
  name: deployments
spec:
  target:
    apiVersion: apps/v1
    kind: Deployment
  customizations:
    healthInterpretation:
      luaScript: "function InterpretHealth(obj) return true end"
"#;

    #[test]
    fn policy_accepts_bare_and_wrapped_placement() {
        let bare = parse_policy("spreadConstraints:\n  - spreadByField: cluster\n    maxGroups: 2\n").unwrap();
        let wrapped = parse_policy(
            "apiVersion: policy.flotilla.io/v1alpha1\nkind: PropagationPolicy\nspec:\n  placement:\n    spreadConstraints:\n      - spreadByField: cluster\n        maxGroups: 2\n",
        )
        .unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.spread_constraints[0].max_groups, 2);
    }

    #[test]
    fn edit_rule_sets_and_clears() {
        let rule = rule_named("replica-revision").unwrap();
        let text = edit_rule(DOC, rule, "function ReviseReplica(obj, n) return obj end").unwrap();
        let doc = CustomizationDocument::from_yaml(&text).unwrap();
        assert!(rule.script(&doc).unwrap().contains("ReviseReplica"));

        let health = rule_named("health-interpretation").unwrap();
        let text = edit_rule(&text, health, "").unwrap();
        let doc = CustomizationDocument::from_yaml(&text).unwrap();
        assert!(health.script(&doc).is_none());
        assert!(rule.script(&doc).is_some());
    }

    #[test]
    fn rule_rows_cover_every_document() {
        let second = DOC.replace("name: deployments", "name: jobs").replace("healthInterpretation", "retention");
        let docs = CustomizationDocument::all_from_yaml(&format!("{DOC}---\n{second}")).unwrap();
        let rows = rule_rows(&docs);
        assert_eq!(rows.len(), 2 * flotilla_interpreter::RULES.len());
        assert!(rows.contains(&(Some("deployments"), "health-interpretation", Some(true))));
        assert!(rows.contains(&(Some("jobs"), "health-interpretation", Some(false))));
        assert!(rows.contains(&(Some("jobs"), "retention", Some(true))));
        assert_eq!(rule_rows(&[])[0], (None, "retention", None));
    }

    #[test]
    fn unknown_rule_lists_known_names() {
        let err = rule_named("nope").unwrap_err().to_string();
        assert!(err.contains("retention"));
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::parse_from(["flotillactl", "--context", "hub", "--group-score", "max", "rules", "list"]);
        let mut cfg = FlotillaConfig::default();
        apply_overrides(&mut cfg, &cli);
        assert_eq!(cfg.context.as_deref(), Some("hub"));
        assert_eq!(cfg.group_score, GroupScoreReduction::Max);
    }

    #[test]
    fn unscripted_engine_refuses() {
        assert!(matches!(Unscripted.call("", "Retain", &[], 1), Err(ScriptError::Runtime(_))));
    }
}
