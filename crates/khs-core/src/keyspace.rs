//! Keyspace Calculator.
//!
//! Derives base keyspace `K_b`, multiplication factor `M`, and effective
//! keyspace `K_e = K_b * M` for an attack definition. The cracking binary
//! is reached through the [`KeyspaceProbe`] seam so the calculator can be
//! tested without invoking a real `hashcat` process, mirroring the
//! teacher's `PtySpawner`/`GitRunner` trait seams.

use crate::types::AttackMode;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

const KEYSPACE_PROBE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum KeyspaceError {
    #[error("attack mode {0:?} is not supported at job creation time")]
    UnsupportedAttackMode(AttackMode),
    #[error("binary invocation timed out after {0:?}")]
    Timeout(Duration),
    #[error("binary invocation failed: {0}")]
    ProcessFailed(String),
    #[error("could not parse keyspace from binary output")]
    UnparseableOutput,
    #[error("keyspace must be positive, got {0}")]
    NonPositive(i64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rule file read error for {path}: {source}")]
    RuleFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single attack's inputs, reduced to what the keyspace probe needs.
#[derive(Debug, Clone)]
pub struct AttackDefinition {
    pub attack_mode: AttackMode,
    pub binary_path: String,
    pub wordlist_paths: Vec<PathBuf>,
    pub rule_paths: Vec<PathBuf>,
    pub mask: Option<String>,
}

impl AttackDefinition {
    /// Build the `hashcat --keyspace ...` argument list.
    pub fn keyspace_args(&self) -> Result<Vec<String>, KeyspaceError> {
        if !self.attack_mode.supported_at_creation() {
            return Err(KeyspaceError::UnsupportedAttackMode(self.attack_mode));
        }

        let mut args = vec![
            "--keyspace".to_string(),
            "-a".to_string(),
            self.attack_mode.as_hashcat_arg().to_string(),
        ];

        match self.attack_mode {
            AttackMode::Straight => {
                for w in &self.wordlist_paths {
                    args.push(w.display().to_string());
                }
                for r in &self.rule_paths {
                    args.push("-r".to_string());
                    args.push(r.display().to_string());
                }
            }
            AttackMode::Combination => {
                for w in self.wordlist_paths.iter().take(2) {
                    args.push(w.display().to_string());
                }
            }
            AttackMode::BruteForce => {
                if let Some(mask) = &self.mask {
                    args.push(mask.clone());
                }
            }
            AttackMode::HybridWordlistMask => {
                if let Some(w) = self.wordlist_paths.first() {
                    args.push(w.display().to_string());
                }
                if let Some(mask) = &self.mask {
                    args.push(mask.clone());
                }
            }
            AttackMode::HybridMaskWordlist => {
                if let Some(mask) = &self.mask {
                    args.push(mask.clone());
                }
                if let Some(w) = self.wordlist_paths.first() {
                    args.push(w.display().to_string());
                }
            }
            AttackMode::Association => unreachable!("rejected above"),
        }

        Ok(args)
    }
}

/// Seam around the cracking binary so tests never shell out.
#[async_trait]
pub trait KeyspaceProbe: Send + Sync {
    async fn probe(&self, attack: &AttackDefinition) -> Result<i64, KeyspaceError>;
}

/// Real implementation: invokes `hashcat --keyspace` with a 2-minute timeout.
pub struct HashcatKeyspaceProbe;

#[async_trait]
impl KeyspaceProbe for HashcatKeyspaceProbe {
    #[instrument(skip(self, attack))]
    async fn probe(&self, attack: &AttackDefinition) -> Result<i64, KeyspaceError> {
        let args = attack.keyspace_args()?;
        let mut cmd = Command::new(&attack.binary_path);
        cmd.args(&args);

        let output = timeout(KEYSPACE_PROBE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| KeyspaceError::Timeout(KEYSPACE_PROBE_TIMEOUT))??;

        if !output.status.success() {
            return Err(KeyspaceError::ProcessFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        parse_keyspace_stdout(&String::from_utf8_lossy(&output.stdout))
    }
}

/// The last non-empty line of stdout, parsed as a positive i64.
fn parse_keyspace_stdout(stdout: &str) -> Result<i64, KeyspaceError> {
    let last_line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or(KeyspaceError::UnparseableOutput)?;

    let value: i64 = last_line
        .trim()
        .parse()
        .map_err(|_| KeyspaceError::UnparseableOutput)?;

    if value <= 0 {
        return Err(KeyspaceError::NonPositive(value));
    }

    Ok(value)
}

/// Counts non-empty, non-`#` lines — a rule file's rule count.
pub fn count_rules(path: &std::path::Path) -> Result<i64, KeyspaceError> {
    let text = std::fs::read_to_string(path).map_err(|source| KeyspaceError::RuleFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(count_rules_in_text(&text))
}

fn count_rules_in_text(text: &str) -> i64 {
    text.lines()
        .filter(|l| {
            let trimmed = l.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .count() as i64
}

/// Counts lines in a wordlist (used for `|W|` in combination/brute
/// multiplication math).
pub fn count_lines(path: &std::path::Path) -> Result<i64, KeyspaceError> {
    let text = std::fs::read_to_string(path).map_err(|source| KeyspaceError::RuleFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.lines().count() as i64)
}

/// The full keyspace calculation: probe `K_b`, derive `M`, and compute
/// `K_e` when it can be known immediately.
pub struct KeyspaceCalculation {
    pub base_keyspace: i64,
    pub multiplication_factor: i64,
    /// `None` when `M > 1` and the true `K_e` must wait on the first
    /// benchmark's `progress[1]`.
    pub effective_keyspace: Option<i64>,
}

#[instrument(skip(probe, attack))]
pub async fn calculate_keyspace(
    probe: &dyn KeyspaceProbe,
    attack: &AttackDefinition,
    rule_counts: &[i64],
) -> Result<KeyspaceCalculation, KeyspaceError> {
    let base_keyspace = probe.probe(attack).await?;
    let multiplication_factor = match attack.attack_mode {
        AttackMode::Straight if !rule_counts.is_empty() => rule_counts.iter().product(),
        AttackMode::Association => rule_counts.iter().sum(),
        AttackMode::Combination => {
            // Handled by the caller via `combination_multiplier`, since it
            // needs both wordlist lengths, not just rule counts.
            1
        }
        _ => 1,
    };

    let effective_keyspace = if multiplication_factor > 1 {
        debug!(
            base_keyspace,
            multiplication_factor, "effective keyspace deferred to first benchmark"
        );
        None
    } else {
        Some(base_keyspace)
    };

    Ok(KeyspaceCalculation {
        base_keyspace,
        multiplication_factor,
        effective_keyspace,
    })
}

/// Combination attack multiplier: `M = min(|W1|, |W2|)`, with `K_b` being
/// the larger wordlist.
pub fn combination_multiplier(wordlist_a_lines: i64, wordlist_b_lines: i64) -> (i64, i64) {
    let base = wordlist_a_lines.max(wordlist_b_lines);
    let factor = wordlist_a_lines.min(wordlist_b_lines);
    (base, factor)
}

/// Test-only fake probe returning canned keyspace values.
#[cfg(test)]
pub struct FakeKeyspaceProbe {
    pub value: i64,
}

#[cfg(test)]
#[async_trait]
impl KeyspaceProbe for FakeKeyspaceProbe {
    async fn probe(&self, attack: &AttackDefinition) -> Result<i64, KeyspaceError> {
        if !attack.attack_mode.supported_at_creation() {
            return Err(KeyspaceError::UnsupportedAttackMode(attack.attack_mode));
        }
        Ok(self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_attack(rules: usize) -> AttackDefinition {
        AttackDefinition {
            attack_mode: AttackMode::Straight,
            binary_path: "hashcat".into(),
            wordlist_paths: vec![PathBuf::from("wordlist.txt")],
            rule_paths: (0..rules)
                .map(|i| PathBuf::from(format!("rule{i}.rule")))
                .collect(),
            mask: None,
        }
    }

    #[test]
    fn parses_last_nonempty_line() {
        let stdout = "Some banner\n\n1000000\n";
        assert_eq!(parse_keyspace_stdout(stdout).unwrap(), 1_000_000);
    }

    #[test]
    fn rejects_non_positive_keyspace() {
        assert!(matches!(
            parse_keyspace_stdout("0\n"),
            Err(KeyspaceError::NonPositive(0))
        ));
    }

    #[test]
    fn rejects_unparseable_output() {
        assert!(matches!(
            parse_keyspace_stdout("not a number\n"),
            Err(KeyspaceError::UnparseableOutput)
        ));
    }

    #[test]
    fn counts_rules_skipping_blanks_and_comments() {
        let text = "# header\n\nM\nsa\n\n# trailing\n";
        assert_eq!(count_rules_in_text(text), 2);
    }

    #[test]
    fn association_rejected_building_args() {
        let mut attack = straight_attack(0);
        attack.attack_mode = AttackMode::Association;
        assert!(matches!(
            attack.keyspace_args(),
            Err(KeyspaceError::UnsupportedAttackMode(_))
        ));
    }

    #[tokio::test]
    async fn no_rules_yields_factor_one_and_immediate_effective() {
        let probe = FakeKeyspaceProbe { value: 1_000_000 };
        let attack = straight_attack(0);
        let calc = calculate_keyspace(&probe, &attack, &[]).await.unwrap();
        assert_eq!(calc.base_keyspace, 1_000_000);
        assert_eq!(calc.multiplication_factor, 1);
        assert_eq!(calc.effective_keyspace, Some(1_000_000));
    }

    #[tokio::test]
    async fn rules_defer_effective_keyspace() {
        let probe = FakeKeyspaceProbe { value: 1_000_000 };
        let attack = straight_attack(1);
        let calc = calculate_keyspace(&probe, &attack, &[100_000])
            .await
            .unwrap();
        assert_eq!(calc.multiplication_factor, 100_000);
        assert_eq!(calc.effective_keyspace, None);
    }

    #[test]
    fn combination_multiplier_picks_smaller_as_factor() {
        let (base, factor) = combination_multiplier(10_000, 100);
        assert_eq!(base, 10_000);
        assert_eq!(factor, 100);
    }
}
