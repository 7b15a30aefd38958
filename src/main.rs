//! Ambient demo binary: wires up a toy three-agent pipeline (scout → analyst
//! → strategist) end to end so the library crate has a runnable surface.
//! Not part of the swarm runtime itself — a real deployment supplies its own
//! agents and binds its own transport around [`abathur_swarm::Orchestrator`].

use std::collections::HashMap;
use std::sync::Arc;

use abathur_swarm::base_agent::{AgentContext, BaseAgent, ExecutionOutcome};
use abathur_swarm::domain::models::blackboard::DataCategory;
use abathur_swarm::domain::models::message::MessagePriority;
use abathur_swarm::domain::models::swarm_event::InsightKind;
use abathur_swarm::infrastructure::config::ConfigLoader;
use abathur_swarm::infrastructure::logging::{LogConfig, LoggerImpl};
use abathur_swarm::run_context::RunContext;
use abathur_swarm::Orchestrator;
use async_trait::async_trait;
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Table};

/// Run the bundled demo pipeline and print the resulting orchestration report.
#[derive(Debug, Parser)]
#[command(name = "abathur-swarm", about = "Multi-agent swarm orchestration runtime demo")]
struct Args {
    /// Subject line the scout agent hands off to the rest of the pipeline.
    #[arg(long, default_value = "the target system")]
    target: String,
}

struct ScoutAgent;

#[async_trait]
impl BaseAgent for ScoutAgent {
    fn id(&self) -> &str {
        "scout"
    }
    fn name(&self) -> &str {
        "Scout"
    }
    async fn execute(&self, ctx: &AgentContext) -> Result<ExecutionOutcome, String> {
        ctx.publish("scout.target", serde_json::json!({"name": "demo"}), Some(DataCategory::Insight))
            .await;
        ctx.emit_insight("identified target surface", MessagePriority::Medium, InsightKind::Finding, None)
            .await;
        Ok(ExecutionOutcome {
            data: serde_json::json!({"surface": "demo"}),
        })
    }
}

struct AnalystAgent;

#[async_trait]
impl BaseAgent for AnalystAgent {
    fn id(&self) -> &str {
        "analyst"
    }
    fn name(&self) -> &str {
        "Analyst"
    }
    fn dependencies(&self) -> Vec<String> {
        vec!["scout".to_string()]
    }
    async fn execute(&self, ctx: &AgentContext) -> Result<ExecutionOutcome, String> {
        let target = ctx.read("scout.target").await;
        ctx.emit_insight("analysis complete", MessagePriority::High, InsightKind::Opportunity, target.clone())
            .await;
        Ok(ExecutionOutcome {
            data: serde_json::json!({"competitor_count": 3, "analysis_of": target}),
        })
    }
}

struct StrategistAgent;

#[async_trait]
impl BaseAgent for StrategistAgent {
    fn id(&self) -> &str {
        "strategist"
    }
    fn name(&self) -> &str {
        "Strategist"
    }
    fn dependencies(&self) -> Vec<String> {
        vec!["analyst".to_string()]
    }
    async fn execute(&self, _ctx: &AgentContext) -> Result<ExecutionOutcome, String> {
        Ok(ExecutionOutcome {
            data: serde_json::json!({
                "overall_score": 78,
                "composite_scores": {"risk": 4, "opportunity": 9},
                "action_plan": {"next_step": "deepen analyst coverage"},
            }),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::load().unwrap_or_else(|err| {
        eprintln!("config load failed, falling back to defaults: {err:#}");
        Default::default()
    });

    let _logger = LoggerImpl::init(&LogConfig::default())?;

    let run_context = RunContext::create(None, Some(config.default_run_limits), true).await;

    let mut orchestrator = Orchestrator::new();
    orchestrator.register(Arc::new(ScoutAgent));
    orchestrator.register(Arc::new(AnalystAgent));
    orchestrator.register(Arc::new(StrategistAgent));

    tracing::info!(target = %args.target, run_id = %run_context.id, "starting demo orchestration run");

    let result = orchestrator.run(run_context, &HashMap::new()).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Agent", "Status", "Duration (ms)"]);
    for agent_result in result.agent_results.values() {
        table.add_row(vec![
            agent_result.agent_name.clone(),
            format!("{:?}", agent_result.status),
            agent_result.execution_time_ms.to_string(),
        ]);
    }
    println!("{table}");
    println!(
        "success={} duration={:.2}s critical_insights={} high_insights={}",
        result.success,
        result.duration_seconds,
        result.critical_insights.len(),
        result.high_insights.len()
    );
    if let Some(score) = result.overall_score {
        println!("overall_score={score}");
    }

    Ok(())
}
