//! Operator-facing status texts shown by the kiosk.

pub const MODEL_LOAD_FAILED: &str = "Error al cargar los modelos de reconocimiento facial";
pub const CAMERA_UNAVAILABLE: &str = "No se pudo acceder a la cámara";
pub const NO_MATCH: &str = "No se encontró coincidencia";
pub const CONNECTION_ERROR: &str = "Error de conexión con el servidor";
pub const UNKNOWN_ERROR: &str = "Error desconocido";
pub const LOADING: &str = "Cargando modelos...";
pub const WAITING: &str = "Presione iniciar para activar la cámara";
pub const DETECTING: &str = "Buscando rostro...";
pub const CHALLENGE: &str = "Sonría para verificar";
pub const VALIDATING: &str = "Validando identidad...";
