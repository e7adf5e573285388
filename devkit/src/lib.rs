/*!
Devkit de desarrollo para el kernel de parqueos

Facilita el desarrollo y los tests de integración sin hardware real:
- MockUnitController = controlador de parqueo simulado sobre TCP
- Inyección de fallas y latencia para ejercitar timeouts y reconexión
- Bitácora de comandos recibidos para aserciones
*/

pub mod mock_unit;

pub use mock_unit::{MockMode, MockUnitController};

/// Inicializa el logging para tests (idempotente).
pub fn init_test_logging() {
    env_logger::try_init().ok();
}
