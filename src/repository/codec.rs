// ==========================================
// 数据交换引擎 - 枚举列编解码
// ==========================================
// 职责: 领域枚举 ↔ 数据库 TEXT 列的统一转换
// 约束: 写入采用 Display 输出（与 serde 口径一致）
// ==========================================

use crate::domain::types::{
    ErrorEntryType, ExchangeDirection, FileFormat, JobPhase, JobStatus, RowAction, RuleStage,
    Severity,
};
use crate::repository::error::{RepositoryError, RepositoryResult};

fn field_err(field: &str, value: &str) -> RepositoryError {
    RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("无法识别的枚举值: {}", value),
    }
}

pub(crate) fn parse_direction(raw: &str) -> RepositoryResult<ExchangeDirection> {
    match raw {
        "IMPORT" => Ok(ExchangeDirection::Import),
        "EXPORT" => Ok(ExchangeDirection::Export),
        _ => Err(field_err("direction", raw)),
    }
}

pub(crate) fn parse_file_format(raw: &str) -> RepositoryResult<FileFormat> {
    match raw {
        "CSV" => Ok(FileFormat::Csv),
        "EXCEL" => Ok(FileFormat::Excel),
        "JSON" => Ok(FileFormat::Json),
        "XML" => Ok(FileFormat::Xml),
        "CUSTOM" => Ok(FileFormat::Custom),
        _ => Err(field_err("file_format", raw)),
    }
}

pub(crate) fn parse_status(raw: &str) -> RepositoryResult<JobStatus> {
    match raw {
        "DRAFT" => Ok(JobStatus::Draft),
        "PENDING" => Ok(JobStatus::Pending),
        "VALIDATING" => Ok(JobStatus::Validating),
        "PROCESSING" => Ok(JobStatus::Processing),
        "COMPLETED" => Ok(JobStatus::Completed),
        "PARTIAL" => Ok(JobStatus::Partial),
        "FAILED" => Ok(JobStatus::Failed),
        "CANCELLED" => Ok(JobStatus::Cancelled),
        "ROLLED_BACK" => Ok(JobStatus::RolledBack),
        _ => Err(field_err("status", raw)),
    }
}

pub(crate) fn parse_phase(raw: &str) -> RepositoryResult<JobPhase> {
    match raw {
        "FETCH" => Ok(JobPhase::Fetch),
        "PARSE" => Ok(JobPhase::Parse),
        "VALIDATE" => Ok(JobPhase::Validate),
        "PROCESS" => Ok(JobPhase::Process),
        "WRITE" => Ok(JobPhase::Write),
        "FINALIZE" => Ok(JobPhase::Finalize),
        _ => Err(field_err("phase", raw)),
    }
}

pub(crate) fn parse_severity(raw: &str) -> RepositoryResult<Severity> {
    match raw {
        "ERROR" => Ok(Severity::Error),
        "WARNING" => Ok(Severity::Warning),
        "INFO" => Ok(Severity::Info),
        _ => Err(field_err("severity", raw)),
    }
}

pub(crate) fn parse_row_action(raw: &str) -> RepositoryResult<RowAction> {
    match raw {
        "CREATED" => Ok(RowAction::Created),
        "UPDATED" => Ok(RowAction::Updated),
        "SKIPPED" => Ok(RowAction::Skipped),
        "FAILED" => Ok(RowAction::Failed),
        _ => Err(field_err("action", raw)),
    }
}

pub(crate) fn parse_rule_stage(raw: &str) -> RepositoryResult<RuleStage> {
    match raw {
        "RAW" => Ok(RuleStage::Raw),
        "MAPPED" => Ok(RuleStage::Mapped),
        _ => Err(field_err("stage", raw)),
    }
}

pub(crate) fn parse_error_entry_type(raw: &str) -> RepositoryResult<ErrorEntryType> {
    match raw {
        "validation" => Ok(ErrorEntryType::Validation),
        "transformation" => Ok(ErrorEntryType::Transformation),
        "duplicate" => Ok(ErrorEntryType::Duplicate),
        "processing" => Ok(ErrorEntryType::Processing),
        "file" => Ok(ErrorEntryType::File),
        _ => Err(field_err("error_type", raw)),
    }
}

pub(crate) fn parse_field_type(raw: &str) -> RepositoryResult<crate::domain::types::FieldType> {
    use crate::domain::types::FieldType;
    match raw {
        "STRING" => Ok(FieldType::String),
        "INTEGER" => Ok(FieldType::Integer),
        "DECIMAL" => Ok(FieldType::Decimal),
        "DATE" => Ok(FieldType::Date),
        "DATETIME" => Ok(FieldType::DateTime),
        "BOOLEAN" => Ok(FieldType::Boolean),
        _ => Err(field_err("field_type", raw)),
    }
}
