//! 检验结果判定命令行程序

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lis_admin::{init_logging, ConfigManager};
use lis_core::{LabTestOrder, Physician, ValueType};
use lis_workflow::{classify, evaluate_order, refresh_order, JsonDirResultStore, ResultEntryEngine};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "lis-server")]
#[command(about = "Laboratory result classification and escalation")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 判定单个结果值
    Classify {
        #[arg(long)]
        value: String,
        #[arg(long)]
        range: String,
        #[arg(long = "type", default_value = "number")]
        value_type: ValueType,
    },
    /// 评估一个检验单，不保存
    Evaluate {
        #[arg(long)]
        order: PathBuf,
        #[command(flatten)]
        physician: PhysicianArgs,
    },
    /// 录入并保存一个或多个检验单
    Submit {
        #[arg(long)]
        orders: PathBuf,
        #[command(flatten)]
        physician: PhysicianArgs,
        /// 强制批量模式
        #[arg(long)]
        batch: bool,
    },
}

#[derive(clap::Args, Debug)]
struct PhysicianArgs {
    /// 复核医生姓名
    #[arg(long)]
    physician: Option<String>,
    /// 复核医生ID，缺省时使用姓名
    #[arg(long)]
    physician_id: Option<String>,
}

impl PhysicianArgs {
    fn resolve(&self) -> Option<Physician> {
        self.physician.as_ref().map(|name| {
            let id = self.physician_id.clone().unwrap_or_else(|| name.clone());
            Physician::new(id, name.clone())
        })
    }
}

/// 检验单文件可以是单个对象或数组
#[derive(Deserialize)]
#[serde(untagged)]
enum OrderInput {
    One(LabTestOrder),
    Many(Vec<LabTestOrder>),
}

fn load_orders(path: &Path) -> Result<Vec<LabTestOrder>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read order file {}", path.display()))?;
    let input: OrderInput = serde_json::from_str(&body)
        .with_context(|| format!("Failed to parse order file {}", path.display()))?;
    Ok(match input {
        OrderInput::One(order) => vec![order],
        OrderInput::Many(orders) => orders,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref())?;
    let mut config = manager.get_config().await;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging)?;

    match args.command {
        Command::Classify { value, range, value_type } => {
            println!("{}", classify(&value, &range, value_type));
        }
        Command::Evaluate { order, physician } => {
            let physician = physician.resolve();
            let mut orders = load_orders(&order)?;
            let mut reports = Vec::with_capacity(orders.len());
            for order in &mut orders {
                refresh_order(order);
                let evaluation = evaluate_order(order, physician.as_ref());
                reports.push(serde_json::json!({
                    "sample_id": order.sample_id,
                    "parameters": order.parameters,
                    "evaluation": evaluation,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Submit { orders, physician, batch } => {
            let physician = physician.resolve();
            let orders = load_orders(&orders)?;
            let store = Arc::new(JsonDirResultStore::new(&config.store.results_dir));
            let mut engine = ResultEntryEngine::new(store, batch || config.engine.batch_mode);
            submit_orders(&mut engine, orders, physician).await?;
        }
    }

    Ok(())
}

async fn submit_orders(
    engine: &mut ResultEntryEngine,
    orders: Vec<LabTestOrder>,
    physician: Option<Physician>,
) -> Result<()> {
    let total = orders.len();
    let mut accepted = Vec::new();

    for order in orders {
        let sample_id = order.sample_id.clone();
        if let Err(e) = engine.enqueue_order(order) {
            warn!("Skipping sample {}: {}", sample_id, e);
            continue;
        }
        accepted.push(sample_id);
    }

    let mut saved = 0;
    let mut flagged = 0;
    for sample_id in accepted {
        engine.select_sample(&sample_id)?;
        engine.assign_physician(physician.clone())?;
        match engine.save().await {
            Ok(outcome) => {
                saved += 1;
                if outcome.evaluation.escalate {
                    flagged += 1;
                }
                info!("Sample {} -> {:?}", outcome.sample_id, outcome.stage);
            }
            Err(e) if e.is_validation() => {
                warn!("Sample {} not saved: {}", sample_id, e);
                engine.cancel_selection();
            }
            Err(e) => {
                error!("Sample {} failed to save: {}", sample_id, e);
                return Err(e).context("Result store rejected a save");
            }
        }
    }

    if engine.batch_mode() {
        let committed = engine.commit_batch().await.context("Batch commit failed")?;
        println!("Committed batch of {} order(s) ({} flagged, {} of {} accepted)", committed, flagged, saved, total);
    } else {
        println!("Saved {} of {} order(s) ({} flagged)", saved, total, flagged);
    }
    Ok(())
}
