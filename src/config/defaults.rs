/// Default configuration constants used across the system.

/// Default base URL for a local Ollama daemon (chat and embeddings).
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default base URL for the OpenAI API.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default chat model.
pub const DEFAULT_COMPLETION_MODEL: &str = "goekdenizguelmez/JOSIEFIED-Qwen3:8b";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Reply generation timeout (2 minutes).
pub const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 120;

/// Embedding request timeout.
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

/// Number of memories returned by a search when the caller does not ask for
/// a specific count.
pub const DEFAULT_SEARCH_LIMIT: i64 = 5;

/// Maximum pooled SQLite connections.
pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Entries kept by the optional embedding cache before it is flushed.
pub const DEFAULT_EMBEDDING_CACHE_ENTRIES: usize = 1024;

/// Maximum length of a normalized username.
pub const MAX_USERNAME_CHARS: usize = 40;

/// Persona directive sent as the first message of every completion.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Josie, a curious AI building a high-resolution neural map of your user. \
After your main answer, ask ONE short, personal, open-ended question (max 15 words) \
that invites deeper sharing. Never repeat previous questions.";
