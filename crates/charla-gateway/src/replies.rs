//! User-facing reply texts. The provider-facing surface speaks Spanish;
//! internal failure details never reach these strings.

/// Phone axis over its ceiling.
pub const PHONE_RATE_LIMIT: &str = "Has enviado demasiados mensajes en poco tiempo. \
Por favor, espera un momento antes de escribir de nuevo.";

/// IP axis over its ceiling — worded differently so operators can triage
/// from logs and transcripts.
pub const IP_RATE_LIMIT: &str = "Estamos recibiendo demasiadas solicitudes desde tu conexión. \
Por favor, intenta de nuevo más tarde.";

/// Empty body or sender after extraction.
pub const CANNOT_PROCESS: &str = "Lo siento, no pude procesar tu mensaje. \
Por favor, envía un mensaje de texto.";

/// Any internal failure on the synchronous path.
pub const TECHNICAL_DIFFICULTIES: &str = "Lo siento, estamos experimentando dificultades técnicas. \
Por favor, intenta de nuevo en unos momentos.";

/// Payload failed validation.
pub const INVALID_REQUEST: &str = "Lo siento, no pude entender tu mensaje. \
Por favor, intenta de nuevo.";
