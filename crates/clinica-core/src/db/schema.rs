//! SQLite schema definition.

/// Complete database schema.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Doctor roster
-- ============================================================================

CREATE TABLE IF NOT EXISTS doctors (
    doctor_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    specialty TEXT,
    association_type TEXT NOT NULL DEFAULT 'employee',
    active INTEGER NOT NULL DEFAULT 1,
    additional_permissions TEXT NOT NULL DEFAULT '{}',  -- JSON PermissionFlagSet
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_doctors_active ON doctors(active);

-- ============================================================================
-- Secretary grants
-- ============================================================================

CREATE TABLE IF NOT EXISTS secretary_grants (
    user_id TEXT PRIMARY KEY,
    scope_type TEXT NOT NULL CHECK (scope_type IN ('all_doctors', 'specific_doctors', 'single_doctor')),
    scope_doctor_ids TEXT NOT NULL DEFAULT '[]',        -- JSON array of doctor ids
    permissions TEXT NOT NULL DEFAULT '{}',             -- JSON ModulePermissionSet
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Operators
-- ============================================================================

CREATE TABLE IF NOT EXISTS operadoras (
    id TEXT PRIMARY KEY,
    nome TEXT NOT NULL,
    registro_ans TEXT NOT NULL,
    codigo_prestador TEXT NOT NULL
);

-- ============================================================================
-- TISS lots
-- ============================================================================

CREATE TABLE IF NOT EXISTS tiss_lotes (
    id TEXT PRIMARY KEY,
    numero_lote INTEGER NOT NULL UNIQUE,
    operadora_id TEXT NOT NULL REFERENCES operadoras(id),
    status TEXT NOT NULL DEFAULT 'aberto',
    guia_ids TEXT NOT NULL DEFAULT '[]',                -- JSON array of guide ids
    valor_total TEXT NOT NULL DEFAULT '0',              -- decimal as text
    protocolo TEXT,
    motivo_rejeicao TEXT,
    artifact_hash TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_lotes_status ON tiss_lotes(status);
CREATE INDEX IF NOT EXISTS idx_lotes_operadora ON tiss_lotes(operadora_id);

-- ============================================================================
-- TISS guides
-- ============================================================================

CREATE TABLE IF NOT EXISTS tiss_guides (
    id TEXT PRIMARY KEY,
    numero_guia_prestador TEXT NOT NULL,
    tipo_guia TEXT NOT NULL,
    operadora_id TEXT NOT NULL REFERENCES operadoras(id),
    beneficiario TEXT NOT NULL DEFAULT '{}',            -- JSON Beneficiario
    doctor_id TEXT,
    data_atendimento TEXT,
    senha_autorizacao TEXT,
    status TEXT NOT NULL DEFAULT 'rascunho',
    procedimentos TEXT NOT NULL DEFAULT '[]',           -- JSON array of Procedimento
    valor_total TEXT NOT NULL DEFAULT '0',
    valor_glosado TEXT NOT NULL DEFAULT '0',
    valor_pago TEXT NOT NULL DEFAULT '0',
    motivo_glosa TEXT,
    lote_id TEXT REFERENCES tiss_lotes(id),
    locked INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_guides_status ON tiss_guides(status);
CREATE INDEX IF NOT EXISTS idx_guides_lote ON tiss_guides(lote_id);
CREATE INDEX IF NOT EXISTS idx_guides_doctor ON tiss_guides(doctor_id);

-- Locked guides belong to a closed lot and cannot be removed
CREATE TRIGGER IF NOT EXISTS tiss_guides_locked_delete BEFORE DELETE ON tiss_guides
WHEN old.locked = 1 OR old.status NOT IN ('rascunho', 'validado')
BEGIN
    SELECT RAISE(ABORT, 'Guide is locked or already submitted');
END;
"#;
