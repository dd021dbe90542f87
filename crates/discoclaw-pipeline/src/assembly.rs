//! Context assembly (spec §4.5): persona files, persona context modules,
//! per-channel context, memory tiers, reply chain/pins, channel history,
//! and attachment transcripts, composed into a single prompt around a fixed
//! boundary string.

use std::path::{Path, PathBuf};

use discoclaw_core::constants::{
    CHANNEL_CONTEXT_DIR, CONTEXT_BOUNDARY, PERSONA_CONTEXT_DIR, PERSONA_FILES,
};
use discoclaw_core::config::ContextConfig;
use discoclaw_memory::MemoryManager;
use tracing::warn;

use crate::context::IncomingMessage;
use crate::error::{PipelineError, Result};

/// Truncate `s` to at most `budget` bytes at a line boundary, appending an
/// ellipsis and a "(+N more)" marker when truncated.
fn truncate_budgeted(s: &str, budget: usize) -> String {
    if s.len() <= budget {
        return s.to_string();
    }
    let mut cut = budget;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = s[..cut].to_string();
    if let Some(nl) = truncated.rfind('\n') {
        truncated.truncate(nl);
    }
    let dropped_lines = s[truncated.len()..].lines().count();
    truncated.push_str(&format!("\n... (+{dropped_lines} more)"));
    truncated
}

/// Reads required persona files and the required persona context module
/// directory from the workspace root. Checked once at startup; a missing
/// persona context directory is startup-fatal, a missing individual persona
/// file is silently skipped.
pub struct PersonaFiles {
    workspace_root: PathBuf,
}

impl PersonaFiles {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    /// Verify the persona context module directory exists. Call once at
    /// process startup; the process should abort if this errors.
    pub fn verify_required(&self) -> Result<()> {
        let dir = self.workspace_root.join(PERSONA_CONTEXT_DIR);
        if !dir.is_dir() {
            return Err(PipelineError::MissingContextDir(dir.display().to_string()));
        }
        Ok(())
    }

    /// Render `SOUL.md`, `IDENTITY.md`, `USER.md` (and any others in the
    /// canonical set), each silently skipped when absent.
    pub fn render_persona_files(&self) -> String {
        let mut out = String::new();
        for name in PERSONA_FILES {
            if let Ok(content) = std::fs::read_to_string(self.workspace_root.join(name)) {
                out.push_str(&content);
                out.push('\n');
            }
        }
        out
    }

    /// Render every `*.md` file in the persona context module directory, in
    /// sorted filename order.
    pub fn render_context_modules(&self) -> Result<String> {
        let dir = self.workspace_root.join(PERSONA_CONTEXT_DIR);
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == "md"))
            .collect();
        entries.sort();

        let mut out = String::new();
        for path in entries {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    out.push_str(&content);
                    out.push('\n');
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read persona context module"),
            }
        }
        Ok(out)
    }
}

/// Reads and appends to the per-channel auto-indexed context file.
pub struct ChannelContext {
    data_root: PathBuf,
}

impl ChannelContext {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    fn path_for(&self, channel_id: &str) -> PathBuf {
        self.data_root.join(CHANNEL_CONTEXT_DIR).join(format!("{channel_id}.md"))
    }

    /// Existing content for `channel_id`, or empty when none has accumulated.
    pub fn read(&self, channel_id: &str) -> String {
        std::fs::read_to_string(self.path_for(channel_id)).unwrap_or_default()
    }

    /// Append a single indexed line (typically a short turn summary),
    /// keeping at most `max_lines` most-recent lines.
    pub fn append(&self, channel_id: &str, line: &str, max_lines: usize) -> Result<()> {
        let path = self.path_for(channel_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut lines: Vec<String> = std::fs::read_to_string(&path)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect();
        lines.push(line.to_string());
        if lines.len() > max_lines {
            let drop = lines.len() - max_lines;
            lines.drain(0..drop);
        }
        atomic_write(&path, &lines.join("\n"))?;
        Ok(())
    }
}

fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Assembles the full prompt for one invocation, per the §4.5 composition
/// rule: persona files, persona context modules, channel context, short-term
/// memory, durable memory, reply chain/pins, channel history, attachment
/// transcripts, the boundary string, then the user message.
pub struct ContextAssembler<'a> {
    pub persona: &'a PersonaFiles,
    pub channel_context: &'a ChannelContext,
    pub memory: &'a MemoryManager,
    pub config: &'a ContextConfig,
}

impl<'a> ContextAssembler<'a> {
    pub fn assemble(
        &self,
        msg: &IncomingMessage,
        reply_chain_and_pins: &str,
        channel_history: &str,
    ) -> Result<String> {
        let persona_files = self.persona.render_persona_files();
        let persona_context_modules = self.persona.render_context_modules()?;
        let channel_ctx = self.channel_context.read(&msg.channel_id);

        let short_term = truncate_budgeted(
            &self.memory.render(
                discoclaw_memory::MemoryTier::ShortTerm,
                &msg.user_id,
                self.config.shortterm_inject_max_chars,
            ),
            self.config.shortterm_inject_max_chars,
        );
        let durable = truncate_budgeted(
            &self.memory.render(
                discoclaw_memory::MemoryTier::Durable,
                &msg.user_id,
                self.config.durable_inject_max_chars,
            ),
            self.config.durable_inject_max_chars,
        );

        let reply_chain_and_pins = truncate_budgeted(reply_chain_and_pins, self.config.message_history_budget);
        let channel_history = truncate_budgeted(channel_history, self.config.message_history_budget);

        let attachment_transcripts = render_attachments(msg, self.config.attachment_text_budget);

        let mut sections = Vec::new();
        for section in [
            persona_files,
            persona_context_modules,
            channel_ctx,
            short_term,
            durable,
            reply_chain_and_pins,
            channel_history,
            attachment_transcripts,
        ] {
            if !section.trim().is_empty() {
                sections.push(section);
            }
        }

        let mut prompt = sections.join("\n");
        if !prompt.is_empty() {
            prompt.push('\n');
        }
        prompt.push_str(CONTEXT_BOUNDARY);
        prompt.push('\n');
        prompt.push_str(&msg.text);
        Ok(prompt)
    }
}

fn render_attachments(msg: &IncomingMessage, budget: usize) -> String {
    let mut out = String::new();
    for (filename, content) in &msg.attachment_texts {
        let truncated = truncate_budgeted(content, budget);
        out.push_str(&format!("--- {filename} ---\n{truncated}\n"));
    }
    for note in &msg.attachment_notes {
        out.push_str(note);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_under_budget_is_unchanged() {
        assert_eq!(truncate_budgeted("short", 100), "short");
    }

    #[test]
    fn truncate_over_budget_adds_marker() {
        let s = (0..50).map(|i| format!("line {i}\n")).collect::<String>();
        let truncated = truncate_budgeted(&s, 20);
        assert!(truncated.contains("more)"));
        assert!(truncated.len() < s.len());
    }

    #[test]
    fn verify_required_fails_without_context_dir() {
        let dir = tempfile::tempdir().unwrap();
        let persona = PersonaFiles::new(dir.path());
        assert!(persona.verify_required().is_err());
    }

    #[test]
    fn verify_required_succeeds_with_context_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("context")).unwrap();
        let persona = PersonaFiles::new(dir.path());
        assert!(persona.verify_required().is_ok());
    }

    #[test]
    fn persona_files_silently_skip_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let persona = PersonaFiles::new(dir.path());
        assert_eq!(persona.render_persona_files(), "");
    }

    #[test]
    fn channel_context_roundtrips_and_caps_lines() {
        let dir = tempfile::tempdir().unwrap();
        let cc = ChannelContext::new(dir.path());
        for i in 0..10 {
            cc.append("chan1", &format!("turn {i}"), 3).unwrap();
        }
        let content = cc.read("chan1");
        assert_eq!(content.lines().count(), 3);
        assert!(content.contains("turn 9"));
        assert!(!content.contains("turn 0"));
    }

    #[test]
    fn boundary_appears_exactly_once_before_user_message() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("context")).unwrap();
        let persona = PersonaFiles::new(dir.path());
        let channel_context = ChannelContext::new(dir.path());
        let memory = MemoryManager::new(dir.path().join("memory"));
        let config = ContextConfig::default();
        let assembler = ContextAssembler {
            persona: &persona,
            channel_context: &channel_context,
            memory: &memory,
            config: &config,
        };
        let msg = IncomingMessage {
            guild_id: None,
            channel_id: "c1".into(),
            message_id: "m1".into(),
            thread_parent_id: None,
            user_id: "u1".into(),
            from_trusted_bot: false,
            text: "hello there".into(),
            images: vec![],
            attachment_texts: vec![],
            attachment_notes: vec![],
        };
        let prompt = assembler.assemble(&msg, "", "").unwrap();
        assert_eq!(prompt.matches(CONTEXT_BOUNDARY).count(), 1);
        assert!(prompt.ends_with("hello there"));
        let boundary_pos = prompt.find(CONTEXT_BOUNDARY).unwrap();
        let message_pos = prompt.find("hello there").unwrap();
        assert!(boundary_pos < message_pos);
    }
}
