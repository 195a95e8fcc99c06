//! Sidekick 命令行入口
//!
//! 初始化日志、加载配置、构建 Sidekick 并恢复上次会话，然后逐行读取 stdin：
//! `:criteria <text>` 设置成功标准，`:reset`、`:clear`、`:history`、`:quit`，其余输入作为任务。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sidekick::memory::{Message, Role, VerdictKind};
use sidekick::react::SidekickEvent;
use sidekick::{create_sidekick_builder, observability};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn print_message(msg: &Message) {
    match msg.role {
        Role::User => println!("you> {}", msg.content),
        Role::Worker => println!("sidekick> {}", msg.content),
        Role::Tool => println!("  · {}", msg.content.lines().next().unwrap_or_default()),
        Role::Evaluator => {
            let tag = match msg.verdict {
                Some(VerdictKind::Satisfied) => "✓",
                Some(VerdictKind::Unsatisfied) => "✗",
                Some(VerdictKind::NeedsUserInput) => "?",
                None => "·",
            };
            println!("evaluator {tag} {}", msg.content);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let builder = create_sidekick_builder(config_path)
        .context("Failed to prepare sidekick")?
        .with_event_tx(event_tx);
    let sidekick = Arc::new(builder.build());

    // 过程事件：只展示工具调用与迭代进度，回复与评审由历史打印
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SidekickEvent::IterationStarted { iteration, max } => {
                    println!("-- iteration {iteration}/{max}")
                }
                SidekickEvent::ToolCall { tool, .. } => println!("  → {tool}"),
                _ => {}
            }
        }
    });

    // Ctrl+C 取消当前 run，不退出程序
    {
        let sidekick = sidekick.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                sidekick.cancel();
                println!("(cancel requested)");
            }
        });
    }

    let session = sidekick.resume().await;
    let mut criteria = session.criteria.clone();
    let mut history = session.messages;
    if !history.is_empty() {
        println!("Resumed {} messages.", history.len());
    }
    println!("Tools: {}", sidekick.tool_names().join(", "));
    println!("Commands: :criteria <text>, :reset, :clear, :history, :quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest.trim())) {
            (":quit", _) | (":q", _) => break,
            (":criteria", text) => {
                criteria = text.to_string();
                println!("Success criteria: {}", if criteria.is_empty() { "(none)" } else { criteria.as_str() });
            }
            (":reset", _) => {
                sidekick.reset();
                criteria.clear();
                println!("Reset.");
            }
            (":clear", _) => {
                sidekick.clear_memory().await;
                history.clear();
                criteria.clear();
                println!("Memory cleared.");
            }
            (":history", _) => history.iter().for_each(print_message),
            _ => {
                let before = history.len();
                history = sidekick.run(line, &criteria, history).await;
                history.iter().skip(before + 1).for_each(print_message);
                if let Some(state) = sidekick.last_state() {
                    tracing::debug!(?state, "run complete");
                }
            }
        }
    }

    sidekick.free_resources().await;
    Ok(())
}
