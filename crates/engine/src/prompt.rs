//! Prompt construction for agent invocations.
//!
//! Single-agent prompts come from a template with `{{placeholder}}` slots.
//! Phase prompts are fixed per phase and carry the outputs of earlier phases.

use ralph_core::config::LoopConfig;
use ralph_core::phase::Phase;
use ralph_core::projection::{PromptContextOptions, serialize_for_prompt};
use ralph_core::story::{Prd, Story};
use ralph_core::thread::Thread;
use std::fmt::Write as _;

use crate::intent::{AgentTask, PhaseTask};

pub const DEFAULT_TEMPLATE: &str = r#"# Project: {{project}}

You are working through a product requirements document one story at a time.
This is iteration {{iteration}} of {{max_iterations}}.

## Current story: {{story_id}} - {{story_title}}

{{story_description}}

### Acceptance criteria
{{acceptance_criteria}}

## Recent history
{{context}}
{{human_response}}
## Instructions
1. Implement the story in the working directory. Keep changes focused on it.
2. Run the project's checks before you finish.
3. If you need a decision from a human, print the question inside
   <request-input>...</request-input> and stop.
4. If every story in the PRD is already complete, print <promise>COMPLETE</promise>.
"#;

/// What each phase asks of its agent.
pub fn phase_instructions(phase: Phase) -> &'static str {
    match phase {
        Phase::Brainstorm => {
            "Explore the codebase and brainstorm approaches for this story. \
             List the options with trade-offs and recommend one. Do not change any files."
        }
        Phase::Clarify => {
            "Read the brainstorm. List the open questions and ambiguities that would block \
             implementation, and answer the ones you can from the code. Do not change any files."
        }
        Phase::Plan => {
            "Turn the brainstorm and clarifications into a concrete, ordered implementation plan: \
             files to touch, functions to add, and how each acceptance criterion will be verified. \
             Do not change any files."
        }
        Phase::Execute => {
            "Implement the plan in the working directory. Make the acceptance criteria pass and \
             run the project's checks before you finish."
        }
        Phase::Aar => {
            "Perform an after-action review of the implementation: compare it against the plan \
             and the acceptance criteria, and list concrete defects or follow-ups. Do not change any files."
        }
        Phase::IncorporateAar => {
            "Apply the fixes called out in the after-action review, then re-run the project's checks."
        }
    }
}

/// Builds the text written to the agent's stdin.
pub struct PromptBuilder {
    template: String,
    max_iterations: u32,
    context: PromptContextOptions,
}

impl PromptBuilder {
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            template: config
                .prompt_template
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            max_iterations: config.max_iterations,
            context: PromptContextOptions::default(),
        }
    }

    pub fn build(&self, thread: &Thread, prd: &Prd, story: &Story, task: &AgentTask) -> String {
        let context = serialize_for_prompt(thread, &self.context);
        match &task.phase {
            Some(phase) => self.build_phase(prd, story, task, phase, &context),
            None => self.render(prd, story, task, &context),
        }
    }

    fn render(&self, prd: &Prd, story: &Story, task: &AgentTask, context: &str) -> String {
        let human_response = match &task.human_response {
            Some(response) => format!("\n## Operator response\n{response}\n"),
            None => String::new(),
        };
        self.template
            .replace("{{project}}", &prd.project)
            .replace("{{story_id}}", &story.id)
            .replace("{{story_title}}", &story.title)
            .replace("{{story_description}}", &story.description)
            .replace("{{acceptance_criteria}}", &criteria_list(story))
            .replace("{{iteration}}", &task.iteration.to_string())
            .replace("{{max_iterations}}", &self.max_iterations.to_string())
            .replace("{{context}}", context)
            .replace("{{human_response}}", &human_response)
    }

    fn build_phase(
        &self,
        prd: &Prd,
        story: &Story,
        task: &AgentTask,
        phase: &PhaseTask,
        context: &str,
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Project: {}", prd.project);
        let _ = writeln!(
            out,
            "Phase: {} ({}), attempt {} - iteration {} of {}\n",
            phase.phase, phase.role, phase.attempt, task.iteration, self.max_iterations
        );
        let _ = writeln!(out, "## Story: {} - {}\n", story.id, story.title);
        if !story.description.is_empty() {
            let _ = writeln!(out, "{}\n", story.description);
        }
        let _ = writeln!(out, "### Acceptance criteria\n{}\n", criteria_list(story));

        for (prior, output) in &phase.prior_outputs {
            let _ = writeln!(out, "## Output of {prior}\n{}\n", output.trim_end());
        }

        if let Some(response) = &task.human_response {
            let _ = writeln!(out, "## Operator response\n{response}\n");
        }

        let _ = writeln!(out, "## Recent history\n{context}\n");
        let _ = writeln!(out, "## Your task\n{}", phase_instructions(phase.phase));
        out.push_str(
            "\nIf you need a decision from a human, print the question inside \
             <request-input>...</request-input> and stop.\n",
        );
        if phase.phase.is_execution() {
            out.push_str(
                "If every story in the PRD is already complete, print <promise>COMPLETE</promise>.\n",
            );
        }
        out
    }
}

fn criteria_list(story: &Story) -> String {
    if story.acceptance_criteria.is_empty() {
        return "- (none listed)".to_string();
    }
    story
        .acceptance_criteria
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_core::event::ThreadMeta;
    use ralph_core::phase::Role;

    fn story() -> Story {
        Story {
            id: "US-001".into(),
            title: "Add login".into(),
            description: "Users can log in with email.".into(),
            acceptance_criteria: vec!["form validates email".into(), "session cookie set".into()],
            priority: 1,
            passes: false,
            notes: None,
        }
    }

    fn setup(config: LoopConfig) -> (Thread, Prd) {
        let prd = Prd {
            project: "shop".into(),
            description: String::new(),
            stories: vec![story()],
        };
        let thread = Thread::create(prd.clone(), config, ThreadMeta::new("."));
        (thread, prd)
    }

    fn task(phase: Option<PhaseTask>, human_response: Option<&str>) -> AgentTask {
        AgentTask {
            iteration: 2,
            story_id: "US-001".into(),
            begins_iteration: true,
            phase,
            human_response: human_response.map(str::to_string),
        }
    }

    #[test]
    fn default_template_fills_placeholders() {
        let config = LoopConfig::default();
        let (thread, prd) = setup(config.clone());
        let prompt = PromptBuilder::new(&config).build(&thread, &prd, &story(), &task(None, None));

        assert!(prompt.contains("# Project: shop"));
        assert!(prompt.contains("iteration 2 of 10"));
        assert!(prompt.contains("US-001 - Add login"));
        assert!(prompt.contains("- session cookie set"));
        assert!(prompt.contains("<thread-context"));
        assert!(!prompt.contains("{{"));
        assert!(!prompt.contains("Operator response"));
    }

    #[test]
    fn custom_template_and_human_response() {
        let config = LoopConfig {
            prompt_template: Some("Do {{story_id}}.{{human_response}}".into()),
            ..LoopConfig::default()
        };
        let (thread, prd) = setup(config.clone());
        let prompt =
            PromptBuilder::new(&config).build(&thread, &prd, &story(), &task(None, Some("use argon2")));
        assert!(prompt.starts_with("Do US-001."));
        assert!(prompt.contains("## Operator response\nuse argon2"));
    }

    #[test]
    fn phase_prompt_carries_prior_outputs() {
        let config = LoopConfig::default();
        let (thread, prd) = setup(config.clone());
        let phase = PhaseTask {
            phase: Phase::Plan,
            role: Role::AgentA,
            attempt: 1,
            prior_outputs: vec![
                (Phase::Brainstorm, "use JWT".into()),
                (Phase::Clarify, "which expiry?".into()),
            ],
        };
        let prompt = PromptBuilder::new(&config).build(&thread, &prd, &story(), &task(Some(phase), None));

        assert!(prompt.contains("Phase: plan (agent_a)"));
        assert!(prompt.contains("## Output of brainstorm\nuse JWT"));
        assert!(prompt.find("brainstorm\nuse JWT") < prompt.find("clarify\nwhich expiry?"));
        assert!(prompt.contains(phase_instructions(Phase::Plan)));
        assert!(!prompt.contains("<promise>COMPLETE</promise>"));
    }

    #[test]
    fn every_phase_has_instructions() {
        for phase in Phase::ORDER {
            assert!(!phase_instructions(phase).is_empty());
        }
    }
}
