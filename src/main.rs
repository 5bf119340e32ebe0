use anyhow::Context;
use clap::Parser;
use serde::Serialize;

mod catalog;
mod cli;
mod config;
mod engine;
mod images;
mod semantic;
#[cfg(test)]
mod tests;
mod vision;
mod web;

use cli::Command;
use config::Config;
use engine::SearchEngine;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let mut config = Config::load().context("failed to load config")?;

    match args.command {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            web::start_daemon(config)
        }

        Command::Index {} => {
            let engine = SearchEngine::from_config(&config)?;
            print_json(&engine.categories())
        }

        Command::Search {
            query,
            categories,
            top_k,
            semantic_top_k,
            max_decoration_score,
            min_plain_score,
        } => {
            let engine = SearchEngine::from_config(&config)?;

            let mut request = engine.request(query);
            request.categories = categories.as_deref().map(cli::parse_categories);
            if let Some(top_k) = top_k {
                request.top_k = top_k;
            }
            if let Some(semantic_top_k) = semantic_top_k {
                request.semantic_top_k = semantic_top_k;
            }
            if let Some(score) = max_decoration_score {
                request.max_decoration_score = score;
            }
            if let Some(score) = min_plain_score {
                request.min_plain_score = score;
            }

            print_json(&engine.search(&request)?)
        }

        Command::Recommend { id, top_k } => {
            let engine = SearchEngine::from_config(&config)?;
            print_json(&engine.recommend(id, top_k)?)
        }

        Command::Upload { file, text, top_k } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let engine = SearchEngine::from_config(&config)?;

            let response = match text {
                Some(text) => engine.search_by_image_and_text(&data, &text, top_k)?,
                None => engine.search_by_image(&data, top_k)?,
            };
            print_json(&response)
        }

        Command::Product { id } => {
            let engine = SearchEngine::from_config(&config)?;
            print_json(&engine.product(id)?)
        }
    }
}
