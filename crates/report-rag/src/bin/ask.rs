//! Ask questions against a report corpus.
//!
//! With a question on the command line, answers it once. Without one, reads
//! questions from stdin and keeps a conversation going until EOF.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use report_rag::{
    merge_sources, AnswerPipeline, CitedChunk, ConversationTurn, RAGConfig, RagAnswer,
};

#[derive(Parser, Debug)]
#[command(name = "ask")]
#[command(about = "Answer questions from a report corpus with cited sources", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// URL template for source links, with {report} and {page} placeholders
    #[arg(long)]
    link_template: Option<String>,

    /// Question to answer; starts an interactive session when empty
    question: Vec<String>,
}

/// One line per source, labelled by `label`, plus the rendered link when a
/// template is given and the chunk metadata fills it.
fn source_lines(
    sources: &[CitedChunk],
    link_template: Option<&str>,
    label: impl Fn(usize, &CitedChunk) -> String,
) -> Vec<String> {
    let mut lines = Vec::with_capacity(sources.len());
    for (i, cited) in sources.iter().enumerate() {
        let meta = &cited.chunk.metadata;
        let page = meta
            .page_number()
            .map(|p| format!("page {}", p))
            .unwrap_or_else(|| "page ?".to_string());
        let report = meta.report.as_deref().unwrap_or("unknown report");
        let score = cited
            .rerank_score
            .map(|s| format!(" score {:.3}", s))
            .unwrap_or_default();
        lines.push(format!("  {} {} / {}{}", label(i, cited), report, page, score));
        if let Some(link) = link_template.and_then(|t| cited.source_link(t)) {
            lines.push(format!("      {}", link));
        }
    }
    lines
}

/// Sources of a single answer, labelled with the `(i)` tags the answer cites.
fn cited_lines(chunks: &[CitedChunk], link_template: Option<&str>) -> Vec<String> {
    source_lines(chunks, link_template, |_, cited| cited.tag())
}

/// Sources accumulated over a session. Tags from different answers collide,
/// so the list gets its own `[n]` numbering.
fn session_lines(sources: &[CitedChunk], link_template: Option<&str>) -> Vec<String> {
    source_lines(sources, link_template, |i, _| format!("[{}]", i + 1))
}

fn print_section(title: &str, lines: &[String]) {
    if lines.is_empty() {
        println!("\n{}: none", title);
        return;
    }
    println!("\n{}:", title);
    for line in lines {
        println!("{}", line);
    }
}

fn print_answer(answer: &RagAnswer) {
    println!("{}", answer.answer);
    let timings: Vec<String> = answer
        .timings
        .iter()
        .map(|(stage, elapsed)| format!("{}={}ms", stage.key(), elapsed.as_millis()))
        .collect();
    println!("\n[{}] rerank={:?}", timings.join(" "), answer.rerank);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RAGConfig::from_file(path).map_err(|e| anyhow!(e))?,
        None => RAGConfig::default(),
    };
    let pipeline = AnswerPipeline::from_config(config)
        .await
        .context("Failed to start answer pipeline")?;
    let link_template = cli.link_template.as_deref();

    if !cli.question.is_empty() {
        let answer = pipeline.answer(&cli.question.join(" "), &[]).await?;
        print_answer(&answer);
        print_section("Sources", &cited_lines(&answer.chunks, link_template));
        return Ok(());
    }

    let max_turns = pipeline.config().memory.max_turns;
    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut sources: Vec<CitedChunk> = Vec::new();
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        match pipeline.answer(question, &history).await {
            Ok(answer) => {
                print_answer(&answer);
                print_section("Sources", &cited_lines(&answer.chunks, link_template));
                merge_sources(&mut sources, &answer.chunks);
                print_section("Session sources", &session_lines(&sources, link_template));
                history.push(ConversationTurn::new(question, answer.answer));
                if history.len() > max_turns {
                    history.drain(..history.len() - max_turns);
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;
    use report_rag::{Chunk, ChunkMetadata};

    fn cited(reference: usize, id: &str, page: u32, score: Option<f32>) -> CitedChunk {
        CitedChunk {
            reference,
            chunk: Chunk {
                id: id.to_string(),
                position: 0,
                text: format!("text of {}", id),
                metadata: ChunkMetadata {
                    source: Some(format!("page_{}", page)),
                    report: Some("AR6".to_string()),
                    extra: Default::default(),
                },
            },
            anchor_score: 0.2,
            rerank_score: score,
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_flags_and_question_words() {
        let cli = Cli::try_parse_from([
            "ask",
            "-c",
            "rag.json",
            "--link-template",
            "https://example.org/{report}.pdf#page={page}",
            "Why",
            "do",
            "seas",
            "rise?",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("rag.json")));
        assert_eq!(
            cli.link_template.as_deref(),
            Some("https://example.org/{report}.pdf#page={page}")
        );
        assert_eq!(cli.question.join(" "), "Why do seas rise?");
    }

    #[test]
    fn test_no_question_means_interactive() {
        let cli = Cli::try_parse_from(["ask", "--config", "rag.json"]).unwrap();
        assert!(cli.question.is_empty());
    }

    #[test]
    fn test_help_and_unknown_flags_are_not_questions() {
        let err = Cli::try_parse_from(["ask", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);

        let err = Cli::try_parse_from(["ask", "--confg", "rag.json", "why?"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_session_sources_get_unique_labels() {
        // Two answers each cited their first chunk as (1).
        let sources = vec![cited(1, "c4", 4, Some(0.9)), cited(1, "c7", 7, Some(0.5))];

        let lines = session_lines(&sources, None);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  [1] AR6 / page 4"));
        assert!(lines[1].starts_with("  [2] AR6 / page 7"));
    }

    #[test]
    fn test_answer_sources_keep_their_tags_and_links() {
        let chunks = vec![cited(1, "c4", 4, None), cited(2, "c5", 5, Some(1.25))];
        let lines = cited_lines(&chunks, Some("https://example.org/{report}.pdf#page={page}"));
        assert_eq!(
            lines,
            vec![
                "  (1) AR6 / page 4".to_string(),
                "      https://example.org/AR6.pdf#page=4".to_string(),
                "  (2) AR6 / page 5 score 1.250".to_string(),
                "      https://example.org/AR6.pdf#page=5".to_string(),
            ]
        );
    }
}
