//! # labreport
//!
//! Physics lab report generator driven by chat models.
//!
//! This library provides:
//! - Book ingestion: scanned pages segmented into a title-keyed JSON corpus
//! - Section retrieval by fuzzy experiment title
//! - A tool-using data agent over uploaded CSV measurements (derived
//!   columns, least-squares fits, plots)
//! - Report assembly into LaTeX and compilation to PDF
//!
//! ## Report Flow
//!
//! ```text
//!   query ──► TitleMatcher ──► SectionRetriever ──► Drafter ──► DraftBuffer
//!                                                      │             ▲
//!                                               task summary         │
//!                                                      ▼             │
//!   data/*.csv ──► AgentSession ◄──tools── DataAgent   │             │
//!                       │                              │             │
//!                       └── log, figures, tables ──► Assembler ──────┘
//!                                                      │
//!                                                      ▼
//!                                   tmp/<title>.tex ──► LatexCompiler ──► final_pdf/
//! ```
//!
//! ## Modules
//! - `corpus`: page acquisition, page readers, segmenter and corpus store
//! - `retrieval`: title matchers and section lookup
//! - `drafting`: introduction and task summary
//! - `data`: datasets, expression language, fits, plots, tables
//! - `agent` / `tools`: the data agent loop and its tool palette
//! - `report`: assembly, compilation and the end-to-end pipeline

pub mod agent;
pub mod config;
pub mod corpus;
pub mod data;
pub mod drafting;
pub mod llm;
pub mod report;
pub mod retrieval;
pub mod tools;
pub mod workspace;

pub use config::Config;
pub use report::{ReportPipeline, ReportRequest};
