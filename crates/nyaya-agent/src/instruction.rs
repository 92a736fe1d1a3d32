use nyaya_core::ResearchRequest;

/// Build the user turn passed to any engine backend.
///
/// All backends use this so the prompt format stays consistent; the
/// per-mode system prompt comes from the research profile.
pub fn build_instruction(request: &ResearchRequest) -> String {
    let mut s = format!("Research mode: {}\n\n", request.mode());
    s.push_str("Legal query:\n");
    s.push_str(request.query().trim());
    s.push_str("\n\n---\n\nRespond with the JSON document only.");
    s
}

/// Strip a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    if !t.starts_with("```") {
        return t;
    }
    let nl = match t.find('\n') {
        Some(i) => i,
        None => return t,
    };
    let inner = &t[nl + 1..];
    match inner.strip_suffix("```") {
        Some(body) => body.trim_end(),
        None => inner,
    }
}
