//! Agent roster: prompts, names and hand-off tools.

use serde_json::json;

use crate::llm::ToolSpec;

/// Name of the worker agent that owns the case-file tools.
pub const RESEARCH_AGENT: &str = "sei_research_agent";

/// Name the supervisor is known by in hand-off messages.
pub const SUPERVISOR: &str = "supervisor";

/// Prompt of the research agent.
pub const RESEARCH_PROMPT: &str = "Você é especialista em obter informações sobre processos do SEI. \
Você é capaz de: \
pesquisar processos usando a função search_process, \
listar documentos de um processo usando a função get_document_list_from_process, \
e obter tipos específicos de documentos de um processo usando a função get_document_by_type. ";

/// Coordination prompt of the supervisor.
pub const SUPERVISOR_PROMPT: &str = "Você é um chatbot com um time de especialistas para atender o usuário. \
Use sei_research_agent para responder perguntas sobre processos no \
Sistema Eletrônico de Informações (SEI) do TRE do Rio Grande do Norte (TRE-RN). \
Lembre que o usuário NÃO CONSEGUE LER as mensagens dos agentes, portanto, \
ORGANIZE, FORMATE e REPITA as informações relevantes que os especialistas fornecerem e escreva \
respostas claras e concisas para o usuário.";

/// A worker the supervisor can delegate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    pub name: &'static str,
    pub prompt: &'static str,
    /// Names of the tools bound to this agent.
    pub tools: Vec<&'static str>,
}

impl AgentSpec {
    pub fn research() -> Self {
        Self {
            name: RESEARCH_AGENT,
            prompt: RESEARCH_PROMPT,
            tools: vec![
                "search_process",
                "get_document_list_from_process",
                "get_document_by_type",
            ],
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| *t == name)
    }

    /// Tool the supervisor calls to delegate to this agent.
    pub fn handoff_tool_name(&self) -> String {
        format!("transfer_to_{}", self.name)
    }

    pub fn handoff_tool(&self) -> ToolSpec {
        ToolSpec {
            name: self.handoff_tool_name(),
            description: format!("Ask agent '{}' for help", self.name),
            parameters: json!({ "type": "object", "properties": {}, "required": [] }),
        }
    }
}

/// Tool call the worker's hand-back is recorded as.
pub fn handback_tool_name() -> String {
    format!("transfer_back_to_{}", SUPERVISOR)
}

pub fn handoff_ack(agent: &str) -> String {
    format!("Successfully transferred to {}", agent)
}

pub const HANDBACK_NOTICE: &str = "Transferring back to supervisor";

pub const HANDBACK_ACK: &str = "Successfully transferred back to supervisor";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::should_display;

    #[test]
    fn handoff_names() {
        let agent = AgentSpec::research();
        assert_eq!(agent.handoff_tool_name(), "transfer_to_sei_research_agent");
        assert_eq!(handback_tool_name(), "transfer_back_to_supervisor");
        assert_eq!(agent.handoff_tool().parameters["type"], "object");
    }

    #[test]
    fn acknowledgements_are_hidden_from_users() {
        assert!(!should_display(&handoff_ack(RESEARCH_AGENT)));
        assert!(!should_display(HANDBACK_ACK));
    }

    #[test]
    fn research_agent_tools_exist_in_registry() {
        let registry = crate::traits::ToolRegistry::with_builtins();
        for tool in AgentSpec::research().tools {
            assert!(registry.find(tool).is_some(), "{}", tool);
        }
    }
}
