//! Interface de terminal do rondo: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`BatchProgress`] acompanha visualmente
//! o processamento de um lote no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::engine::{Outcome, RunSummary};

/// Indicador visual de progresso para um lote de itens.
///
/// Exibe uma barra com a contagem de itens resolvidos e mensagens coloridas
/// para sucesso (verde), já tratado (ciano), falha (vermelho) e item pulado (cinza).
#[derive(Clone)]
pub struct BatchProgress {
    // Barra de progresso do indicatif (clonável, compartilha o estado).
    pb: ProgressBar,
    green: Style,
    cyan: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl BatchProgress {
    /// Cria a barra para `total` itens.
    pub fn start(total: u64) -> Self {
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self::with_bar(pb)
    }

    /// Barra invisível, usada quando a saída não é um terminal.
    pub fn hidden(total: u64) -> Self {
        Self::with_bar(ProgressBar::with_draw_target(
            Some(total),
            ProgressDrawTarget::hidden(),
        ))
    }

    fn with_bar(pb: ProgressBar) -> Self {
        Self {
            pb,
            green: Style::new().green().bold(),
            cyan: Style::new().cyan(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Registra o resultado final de um item e avança a barra.
    pub fn record(&self, id: &str, outcome: &Outcome) {
        let line = match outcome {
            Outcome::Success { attempts } => {
                format!("  {} {id} ({attempts} attempt(s))", self.green.apply_to("✓"))
            }
            Outcome::AlreadyHandled { .. } => {
                format!("  {} {id} already handled", self.cyan.apply_to("≡"))
            }
            Outcome::Failure { step, message, attempts } => format!(
                "  {} {id} failed at `{step}` after {attempts} attempt(s): {message}",
                self.red.apply_to("✗")
            ),
        };
        self.pb.println(line);
        self.pb.inc(1);
    }

    /// Registra um item pulado porque o ledger já o marca como concluído.
    pub fn skip(&self, id: &str) {
        self.pb
            .println(format!("  {} {id} skipped (done earlier)", self.dim.apply_to("·")));
        self.pb.inc(1);
    }

    /// Item devolvido à fila porque a sessão caiu; a barra não avança.
    pub fn requeue(&self, id: &str) {
        self.pb
            .println(format!("  {} {id} requeued (session lost)", self.yellow.apply_to("↻")));
    }

    /// Item sem resultado final (o worker entrou em pânico); fica para a próxima execução.
    pub fn unfinished(&self, id: &str) {
        self.pb
            .println(format!("  {} {id} left unfinished (worker panicked)", self.red.apply_to("!")));
        self.pb.inc(1);
    }

    /// Interrompe a barra sem resumo (erro fatal).
    pub fn abandon(&self) {
        self.pb.abandon();
    }

    /// Finaliza a barra e imprime o resumo da execução.
    pub fn finish(&self, summary: &RunSummary) {
        self.pb.finish_and_clear();
        print_summary(summary);
    }
}

/// Imprime o resumo da execução com estilo colorido.
pub fn print_summary(summary: &RunSummary) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();

    println!();
    let header = if summary.is_clean() {
        green.apply_to("─── Run Summary ───")
    } else {
        red.apply_to("─── Run Summary ───")
    };
    println!("{header}");
    println!("  rounds:          {}", summary.rounds);
    println!("  processed:       {}", summary.processed());
    println!("  succeeded:       {}", green.apply_to(summary.succeeded));
    println!("  already handled: {}", summary.already_handled);
    println!("  failed:          {}", red.apply_to(summary.failed));
    println!("  skipped:         {}", summary.skipped);
    println!("  requeued:        {}", summary.requeued);
    if summary.ledger_errors > 0 {
        println!(
            "  {} {} outcome(s) could not be written to the ledger",
            yellow.apply_to("!"),
            summary.ledger_errors
        );
    }
    if summary.cancelled {
        println!(
            "  {} cancelled, {} item(s) left for the next run",
            yellow.apply_to("↻"),
            summary.unfinished
        );
    } else if summary.unfinished > 0 {
        println!(
            "  {} {} item(s) left unfinished, rerun to pick them up",
            red.apply_to("!"),
            summary.unfinished
        );
    }
}
