//! Stop-sequence and output-budget handling for the Messages protocol.
//!
//! Budgets are byte counts (4 bytes per token) but cuts never split a UTF-8
//! character.

/// Terminal reason reported in `stop_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::ToolUse => "tool_use",
        }
    }
}

/// Why text output was cut short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub reason: StopReason,
    /// The matched sequence, for [`StopReason::StopSequence`] only.
    pub sequence: Option<String>,
}

impl Truncation {
    fn max_tokens() -> Self {
        Self {
            reason: StopReason::MaxTokens,
            sequence: None,
        }
    }

    fn stop_sequence(seq: &str) -> Self {
        Self {
            reason: StopReason::StopSequence,
            sequence: Some(seq.to_string()),
        }
    }
}

pub const BYTES_PER_TOKEN: u64 = 4;

/// Trim, drop empties and de-duplicate, keeping first-seen order.
pub fn normalize_stop_sequences(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for seq in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !out.iter().any(|existing| existing == seq) {
            out.push(seq.to_string());
        }
    }
    out
}

/// Earliest match in `text`; on a tie the longer sequence wins.
pub fn find_first_stop<'a>(text: &str, stops: &'a [String]) -> Option<(usize, &'a str)> {
    stops
        .iter()
        .filter(|seq| !seq.is_empty())
        .filter_map(|seq| text.find(seq.as_str()).map(|idx| (idx, seq.as_str())))
        .min_by(|(ia, sa), (ib, sb)| ia.cmp(ib).then(sb.len().cmp(&sa.len())))
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn budget_bytes(max_tokens: u64) -> Option<usize> {
    (max_tokens > 0).then(|| {
        usize::try_from(max_tokens.saturating_mul(BYTES_PER_TOKEN)).unwrap_or(usize::MAX)
    })
}

/// Cut a complete text at the earliest stop sequence, then at the budget.
pub fn limit_text<'t>(
    text: &'t str,
    stops: &[String],
    max_tokens: u64,
) -> (&'t str, Option<Truncation>) {
    let stops = normalize_stop_sequences(stops);
    if text.is_empty() {
        return (text, None);
    }

    let (mut cut, mut truncation) = match find_first_stop(text, &stops) {
        Some((idx, seq)) => (idx, Some(Truncation::stop_sequence(seq))),
        None => (text.len(), None),
    };
    if let Some(budget) = budget_bytes(max_tokens) {
        if budget < cut {
            cut = floor_char_boundary(text, budget);
            truncation = Some(Truncation::max_tokens());
        }
    }
    (&text[..cut], truncation)
}

/// Incremental scanner that holds back just enough text to recognise a stop
/// sequence split across deltas.
///
/// After every [`push`](Self::push) the pending buffer is shorter than the
/// longest stop sequence.
#[derive(Debug)]
pub struct StopScanner {
    stops: Vec<String>,
    max_stop_len: usize,
    budget: Option<usize>,
    pending: String,
    emitted: usize,
    truncation: Option<Truncation>,
}

impl StopScanner {
    pub fn new(stops: Vec<String>, max_tokens: u64) -> Self {
        let stops = normalize_stop_sequences(&stops);
        let max_stop_len = stops.iter().map(String::len).max().unwrap_or(0);
        Self {
            stops,
            max_stop_len,
            budget: budget_bytes(max_tokens),
            pending: String::new(),
            emitted: 0,
            truncation: None,
        }
    }

    pub fn truncation(&self) -> Option<&Truncation> {
        self.truncation.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.truncation.is_some()
    }

    /// Bytes handed out so far, including [`record_output`](Self::record_output).
    pub fn emitted_bytes(&self) -> usize {
        self.emitted
    }

    /// Count output that did not pass through the scanner against the budget.
    pub fn record_output(&mut self, bytes: usize) {
        self.emitted += bytes;
    }

    fn take(&mut self, end: usize) -> String {
        self.emitted += end;
        let rest = self.pending.split_off(end);
        std::mem::replace(&mut self.pending, rest)
    }

    fn remaining_budget(&self) -> Option<usize> {
        self.budget.map(|budget| budget.saturating_sub(self.emitted))
    }

    /// Cut at the budget if emitting all pending text would exceed it.
    fn apply_budget(&mut self) -> Option<String> {
        let remaining = self.remaining_budget()?;
        if self.pending.len() <= remaining {
            return None;
        }
        let allowed = floor_char_boundary(&self.pending, remaining);
        let out = self.take(allowed);
        self.pending.clear();
        self.truncation = Some(Truncation::max_tokens());
        Some(out)
    }

    /// Feed a text increment; returns the text that is safe to emit now.
    pub fn push(&mut self, delta: &str) -> String {
        if delta.is_empty() || self.is_stopped() {
            return String::new();
        }
        self.pending.push_str(delta);

        let mut out = String::new();
        loop {
            if let Some((idx, seq)) = find_first_stop(&self.pending, &self.stops) {
                let mut cut = idx;
                let mut truncation = Truncation::stop_sequence(seq);
                if let Some(remaining) = self.remaining_budget() {
                    if remaining < cut {
                        cut = floor_char_boundary(&self.pending, remaining);
                        truncation = Truncation::max_tokens();
                    }
                }
                out.push_str(&self.take(cut));
                self.pending.clear();
                self.truncation = Some(truncation);
                return out;
            }
            if let Some(cut) = self.apply_budget() {
                out.push_str(&cut);
                return out;
            }
            if self.max_stop_len <= 1 {
                let end = self.pending.len();
                out.push_str(&self.take(end));
                return out;
            }
            let safe = self.pending.len().saturating_sub(self.max_stop_len - 1);
            let safe = floor_char_boundary(&self.pending, safe);
            if safe == 0 {
                return out;
            }
            out.push_str(&self.take(safe));
        }
    }

    /// Release whatever is still held back, subject to the budget.
    pub fn flush(&mut self) -> String {
        if self.is_stopped() {
            self.pending.clear();
            return String::new();
        }
        if let Some(cut) = self.apply_budget() {
            return cut;
        }
        let end = self.pending.len();
        self.take(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_stop_sequences() {
        assert_eq!(
            normalize_stop_sequences(&stops(&[" END ", "", "END", "\n\nHuman:", "  "])),
            stops(&["END", "Human:"])
        );
    }

    #[test]
    fn test_find_first_prefers_earliest_then_longest() {
        let list = stops(&["bc", "b", "abcd"]);
        assert_eq!(find_first_stop("xabcd", &list), Some((1, "abcd")));
        assert_eq!(find_first_stop("xbcd", &list), Some((1, "bc")));
        assert_eq!(find_first_stop("xyz", &list), None);
    }

    #[test]
    fn test_limit_text() {
        let list = stops(&["STOP"]);
        assert_eq!(
            limit_text("abcSTOPxyz", &list, 0),
            ("abc", Some(Truncation::stop_sequence("STOP")))
        );
        assert_eq!(
            limit_text("0123456789", &list, 2),
            ("01234567", Some(Truncation::max_tokens()))
        );
        // the budget only wins when it cuts earlier
        assert_eq!(
            limit_text("abcSTOPxyz", &list, 100),
            ("abc", Some(Truncation::stop_sequence("STOP")))
        );
        assert_eq!(limit_text("plain", &list, 100), ("plain", None));
        assert_eq!(limit_text("", &list, 1), ("", None));
    }

    #[test]
    fn test_scanner_stop_split_across_deltas() {
        let mut scanner = StopScanner::new(stops(&["STOP"]), 0);
        let mut emitted = scanner.push("abcST");
        emitted.push_str(&scanner.push("OPxyz"));
        assert_eq!(emitted, "abc");
        assert_eq!(
            scanner.truncation(),
            Some(&Truncation::stop_sequence("STOP"))
        );
        assert_eq!(scanner.push("more"), "");
        assert_eq!(scanner.flush(), "");
    }

    #[test]
    fn test_scanner_holds_back_partial_match() {
        let mut scanner = StopScanner::new(stops(&["STOP"]), 0);
        assert_eq!(scanner.push("hello S"), "hell");
        assert_eq!(scanner.push("T"), "o");
        assert_eq!(scanner.push("ay"), " S");
        assert_eq!(scanner.flush(), "Tay");
        assert!(!scanner.is_stopped());
    }

    #[test]
    fn test_scanner_budget() {
        let mut scanner = StopScanner::new(Vec::new(), 2);
        assert_eq!(scanner.push("0123456789"), "01234567");
        assert_eq!(scanner.truncation(), Some(&Truncation::max_tokens()));
        assert_eq!(scanner.emitted_bytes(), 8);
    }

    #[test]
    fn test_scanner_stop_inside_budget_window_wins() {
        let mut scanner = StopScanner::new(stops(&["STOP"]), 2);
        assert_eq!(scanner.push("abcSTOPxyz"), "abc");
        assert_eq!(scanner.truncation(), Some(&Truncation::stop_sequence("STOP")));
        assert_eq!(scanner.push("more"), "");

        let (text, truncation) = limit_text("abcSTOPxyz", &stops(&["STOP"]), 2);
        assert_eq!(text, "abc");
        assert_eq!(truncation, Some(Truncation::stop_sequence("STOP")));
    }

    #[test]
    fn test_scanner_budget_before_stop_wins() {
        let mut scanner = StopScanner::new(stops(&["STOP"]), 1);
        assert_eq!(scanner.push("abcdefSTOP"), "abcd");
        assert_eq!(scanner.truncation(), Some(&Truncation::max_tokens()));
    }

    #[test]
    fn test_scanner_budget_counts_recorded_output() {
        let mut scanner = StopScanner::new(Vec::new(), 2);
        scanner.record_output(6);
        assert_eq!(scanner.push("abcd"), "ab");
        assert!(scanner.is_stopped());
    }

    #[test]
    fn test_scanner_budget_on_flush() {
        let mut scanner = StopScanner::new(stops(&["LONGSTOP"]), 1);
        assert_eq!(scanner.push("abc"), "");
        scanner.record_output(2);
        assert_eq!(scanner.flush(), "ab");
        assert_eq!(scanner.truncation(), Some(&Truncation::max_tokens()));
    }

    #[test]
    fn test_scanner_never_splits_characters() {
        let mut scanner = StopScanner::new(stops(&["END"]), 0);
        let mut out = scanner.push("héé");
        out.push_str(&scanner.push("ü"));
        out.push_str(&scanner.flush());
        assert_eq!(out, "hééü");

        let mut scanner = StopScanner::new(Vec::new(), 1);
        assert_eq!(scanner.push("ééé"), "éé");
        let mut scanner = StopScanner::new(Vec::new(), 1);
        assert_eq!(scanner.push("ab€"), "ab");
    }
}
