pub mod specialists;

use nyaya_core::ResearchMode;
use serde_json::{json, Map, Value};

pub use specialists::Specialist;

/// Tools the lead researcher may call directly.
pub const RESEARCH_TOOLS: &str = "WebSearch,WebFetch,Task";

/// How one research mode drives the engine.
#[derive(Debug, Clone)]
pub struct ResearchProfile {
    pub mode: ResearchMode,
    pub system_prompt: String,
    /// Upper bound on agent turns before the engine gives up.
    pub max_turns: u32,
    pub allowed_tools: &'static str,
    pub specialists: Vec<Specialist>,
}

impl ResearchProfile {
    /// Sub-agent definitions keyed by name, as accepted by `claude --agents`.
    pub fn agents_json(&self) -> Value {
        let mut agents = Map::new();
        for s in &self.specialists {
            agents.insert(
                s.name.to_string(),
                json!({
                    "description": s.description,
                    "prompt": s.prompt,
                    "tools": s.tools,
                }),
            );
        }
        Value::Object(agents)
    }

    pub fn specialist(&self, name: &str) -> Option<&Specialist> {
        self.specialists.iter().find(|s| s.name == name)
    }
}

pub fn profile(mode: ResearchMode) -> ResearchProfile {
    let (preamble, turns) = match mode {
        ResearchMode::Normal => (NORMAL_SYSTEM, 30),
        ResearchMode::Detailed => (DETAILED_SYSTEM, 50),
    };
    ResearchProfile {
        mode,
        system_prompt: format!("{preamble}{WORKFLOW}{OUTPUT_FORMAT}"),
        max_turns: turns,
        allowed_tools: RESEARCH_TOOLS,
        specialists: specialists::ALL.to_vec(),
    }
}

/// The answer the engine gives for queries outside Indian law.
pub fn off_topic_answer() -> Value {
    json!({
        "error": "I am a specialized legal research agent focused on Indian law. This query seems outside that domain.",
        "suggestion": "Please ask legal questions related to Indian law.",
    })
}

// ── System prompts ──────────────────────────────────────────────────

const NORMAL_SYSTEM: &str = "\
You are an Indian legal research agent with working command of Indian courts,\n\
procedure and statute. Research the question rigorously and answer with a\n\
single JSON document of cited content. Be concise and focused: give the\n\
depth the question needs and no more.\n";

const DETAILED_SYSTEM: &str = "\
You are an Indian legal research agent with working command of Indian courts,\n\
procedure and statute. Research the question exhaustively and answer with a\n\
single JSON document of cited content. Go deep: clause-by-clause statutory\n\
analysis, facts and holdings of every material judgment, legislative history,\n\
procedural requirements, practical risk and policy considerations. Complex\n\
queries should produce at least 10 to 20 content sections.\n";

const WORKFLOW: &str = "\n\
Workflow:\n\
1. Always delegate to the query-analyzer sub-agent first.\n\
2. If it classifies the query as non-legal or off-topic, answer exactly with\n\
   {\"error\": \"I am a specialized legal research agent focused on Indian law. This query seems outside that domain.\", \"suggestion\": \"Please ask legal questions related to Indian law.\"}\n\
3. For legal-simple queries answer directly with one or two citations.\n\
4. For legal-complex queries delegate to case-law-researcher,\n\
   statutory-researcher and comparative-analyst as needed, search directly\n\
   as well, and separate binding from persuasive authority.\n";

const OUTPUT_FORMAT: &str = "\n\
Output format (mandatory): output only valid JSON, with nothing before or after it.\n\
{\n\
  \"content\": [\n\
    {\"text\": \"A paragraph of analysis\", \"refs\": [\"ref1\", \"ref2\"]}\n\
  ],\n\
  \"references\": {\n\
    \"ref1\": {\"title\": \"Case or statute name\", \"url\": \"https://...\", \"authors\": \"Bench or legislature\", \"year\": 2023, \"type\": \"case\"}\n\
  }\n\
}\n\
Rules:\n\
- every id in a refs list must be defined in references\n\
- type is one of case, statute, article, regulation, report\n\
- include the source URL whenever the search result has one\n\
- split the answer into logical paragraphs\n";
