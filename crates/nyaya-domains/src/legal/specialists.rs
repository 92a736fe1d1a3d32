use serde::Serialize;

/// A sub-agent the lead researcher can delegate to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Specialist {
    pub name: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
    pub tools: &'static [&'static str],
}

pub const QUERY_ANALYZER: Specialist = Specialist {
    name: "query-analyzer",
    description: "Classifies a legal query by relevance, complexity, jurisdiction and legal domain.",
    prompt: QUERY_ANALYZER_PROMPT,
    tools: &["WebSearch"],
};

pub const CASE_LAW_RESEARCHER: Specialist = Specialist {
    name: "case-law-researcher",
    description: "Finds and analyses judgments, binding precedents and their current treatment.",
    prompt: CASE_LAW_PROMPT,
    tools: &["WebSearch", "WebFetch"],
};

pub const STATUTORY_RESEARCHER: Specialist = Specialist {
    name: "statutory-researcher",
    description: "Researches Acts, rules, regulations and the exact provisions that apply.",
    prompt: STATUTORY_PROMPT,
    tools: &["WebSearch", "WebFetch"],
};

pub const COMPARATIVE_ANALYST: Specialist = Specialist {
    name: "comparative-analyst",
    description: "Compares positions across jurisdictions or between conflicting precedents.",
    prompt: COMPARATIVE_PROMPT,
    tools: &["WebSearch", "WebFetch"],
};

pub const ALL: [Specialist; 4] = [
    QUERY_ANALYZER,
    CASE_LAW_RESEARCHER,
    STATUTORY_RESEARCHER,
    COMPARATIVE_ANALYST,
];

// ── Specialist prompts ──────────────────────────────────────────────

const QUERY_ANALYZER_PROMPT: &str = "\
You analyse incoming legal queries before any research is done.\n\
Decide whether the query needs deep research, can be answered directly,\n\
or falls outside Indian law altogether, and report:\n\
\n\
- Relevance: legal-complex / legal-simple / non-legal / off-topic\n\
- Complexity: simple / moderate / complex\n\
- Research type: case law / statutory / advisory / comparative / other\n\
- Jurisdiction: central / state / international\n\
- Legal domain: criminal, civil, constitutional, tax, corporate, family, ...\n\
- Key terms: the legal concepts the research must cover\n\
- Strategy: one or two lines on how to approach the research\n\
- Recommendation: full-research / direct-answer / politely-decline\n\
\n\
Search only to clarify unfamiliar terminology. Keep the output short.";

const CASE_LAW_PROMPT: &str = "\
You research Indian case law.\n\
\n\
1. Find landmark judgments and the binding precedents on the point\n\
2. State the ratio decidendi of each judgment you rely on\n\
3. Record the court and bench strength so precedential weight is clear\n\
4. Check whether a judgment has been overruled, distinguished or doubted\n\
5. Look for recent decisions applying the principle\n\
\n\
Record the source URL for every judgment you cite. Your notes feed the final\n\
report directly, so cite accurately.";

const STATUTORY_PROMPT: &str = "\
You research Indian legislation.\n\
\n\
1. Locate the exact sections, rules and schedules that apply\n\
2. Quote the definitions the answer depends on\n\
3. Check amendments and whether each provision is in force\n\
4. Cover subordinate legislation and notifications where relevant\n\
5. Use statements of objects and reasons when intent matters\n\
\n\
Central and state enactments are both in scope. Record the source URL for\n\
every provision you cite.";

const COMPARATIVE_PROMPT: &str = "\
You compare legal positions.\n\
\n\
Set out how the question is treated across the relevant jurisdictions or\n\
between conflicting lines of authority, where they agree and where they\n\
diverge, and the reasoning behind each approach. Close with the practical\n\
consequences for someone advising under Indian law.\n\
\n\
Record the source URL for every authority you reference.";
