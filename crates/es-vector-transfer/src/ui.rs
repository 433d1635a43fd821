//! Console output and prompts for the command-line tool.

use console::{style, Style};
use dialoguer::{theme::ColorfulTheme, Confirm};

use crate::config::TransferConfig;
use crate::destination::{IndexStats, QueryMatch};
use crate::error::{Error, Result};
use crate::pipeline::TransferStats;

/// Console UI handler.
pub struct ConsoleUi {
    theme: ColorfulTheme,
}

impl Default for ConsoleUi {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleUi {
    /// Creates a new UI handler.
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }

    /// Prints the transfer plan.
    pub fn print_plan(&self, config: &TransferConfig, documents: u64, namespace: &str) {
        let bold = Style::new().bold();

        println!();
        println!("{} Transfer plan", style("📦").bold());
        println!("┌─────────────────────────────────────────────────────────────┐");
        println!("│ {} {} / {}", bold.apply_to("Source:     "), config.es_host, config.es_index);
        println!("│ {} {}", bold.apply_to("Documents:  "), documents);
        println!(
            "│ {} {} ({})",
            bold.apply_to("Embeddings: "),
            config.embedding_type,
            match config.embedding_type {
                crate::config::EmbeddingType::OpenAi => config.openai_model.as_str(),
                crate::config::EmbeddingType::Ollama => config.ollama_model.as_str(),
                crate::config::EmbeddingType::Hash => "feature hashing",
            }
        );
        println!(
            "│ {} {} / {}",
            bold.apply_to("Destination:"),
            if config.pinecone_index_name.is_empty() {
                config.pinecone_index_host.as_deref().unwrap_or("-")
            } else {
                config.pinecone_index_name.as_str()
            },
            namespace
        );
        println!(
            "│ {} {} x {} workers",
            bold.apply_to("Batching:   "),
            config.batch_size,
            config.max_threads
        );
        println!("├─────────────────────────────────────────────────────────────┤");
        if config.fields_to_embed.is_empty() {
            println!("│ {} (all fields)", style("Embedded:").dim());
        } else {
            println!("│ {} {}", bold.apply_to("Embedded:   "), config.fields_to_embed.join(", "));
        }
        if !config.metadata_fields.is_empty() {
            println!("│ {} {}", bold.apply_to("Metadata:   "), config.metadata_fields.join(", "));
        }
        for (from, to) in &config.field_mapping {
            println!("│   • {from} → {to}");
        }
        println!("└─────────────────────────────────────────────────────────────┘");
    }

    /// Prints dry run results.
    pub fn print_dry_run(&self, stats: &TransferStats) {
        let bold = Style::new().bold();

        println!();
        println!("{}", Style::new().cyan().bold().apply_to("🔍 Dry run complete"));
        println!("   {} {}", bold.apply_to("Documents read:  "), stats.processed);
        println!(
            "   {} {}",
            bold.apply_to("Ready to upsert: "),
            stats.processed - stats.failed
        );
        if stats.failed > 0 {
            println!("   {} {}", style("Would fail:").yellow(), stats.failed);
        }
        println!("   {} {:.1}s", bold.apply_to("Duration:        "), stats.duration_secs);
    }

    /// Prints a finished live transfer.
    pub fn print_success(&self, stats: &TransferStats) {
        let green = Style::new().green().bold();
        let bold = Style::new().bold();

        println!();
        println!("{}", green.apply_to("✅ Transfer complete!"));
        println!();
        println!("   {} {}", bold.apply_to("Processed: "), stats.processed);
        println!("   {} {}", bold.apply_to("Upserted:  "), stats.upserted);
        if stats.failed > 0 {
            println!("   {} {} (skipped)", style("Failed:").yellow(), stats.failed);
        }
        println!("   {} {:.1}%", bold.apply_to("Success:   "), stats.success_rate());
        println!("   {} {:.1}s", bold.apply_to("Duration:  "), stats.duration_secs);
        println!("   {} {:.0} docs/s", bold.apply_to("Throughput:"), stats.throughput());
        println!();
    }

    /// Prints an aborted transfer with its partial statistics.
    pub fn print_aborted(&self, err: &Error) {
        self.print_error(&err.to_string());
        if let Some(stats) = err.partial_stats() {
            println!(
                "   {} {} processed, {} upserted, {} failed before the abort",
                style("Partial:").dim(),
                stats.processed,
                stats.upserted,
                stats.failed
            );
        }
    }

    /// Prints destination index statistics.
    pub fn print_index_stats(&self, stats: &IndexStats) {
        let bold = Style::new().bold();

        println!();
        println!("{} Index statistics", style("📊").bold());
        println!(
            "   {} {}",
            bold.apply_to("Dimension:"),
            stats.dimension.map_or("unknown".to_string(), |d| d.to_string())
        );
        println!("   {} {}", bold.apply_to("Vectors:  "), stats.total_vector_count);
        for (name, ns) in &stats.namespaces {
            let name = if name.is_empty() { "(default)" } else { name.as_str() };
            println!("     - {}: {}", name, ns.vector_count);
        }
    }

    /// Prints search hits.
    pub fn print_matches(&self, query: &str, matches: &[QueryMatch]) {
        println!();
        println!("{} Results for {}", style("🔎").bold(), style(query).bold());
        if matches.is_empty() {
            println!("   {}", style("no matches").dim());
            return;
        }
        for (rank, m) in matches.iter().enumerate() {
            println!("   {}. {} {}", rank + 1, style(&m.id).cyan(), style(format!("({:.4})", m.score)).dim());
            if let Some(metadata) = &m.metadata {
                for (key, value) in metadata.iter().take(5) {
                    let text = value.as_str().map_or_else(|| value.to_string(), str::to_string);
                    println!("      {}: {}", style(key).dim(), truncate(&text, 80));
                }
            }
        }
    }

    /// Asks whether to start the live transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the prompt cannot be shown.
    pub fn confirm_transfer(&self, documents: u64) -> Result<bool> {
        println!();
        Confirm::with_theme(&self.theme)
            .with_prompt(format!("Upsert {documents} documents into the vector store?"))
            .default(true)
            .interact()
            .map_err(|e| Error::Config(format!("Input cancelled: {e}")))
    }

    /// Prints cancellation message.
    pub fn print_cancelled(&self) {
        println!();
        println!("{} Transfer cancelled.", style("ℹ").blue());
    }

    /// Prints error message.
    pub fn print_error(&self, message: &str) {
        println!();
        println!("{} {}", style("❌").red().bold(), message);
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}
