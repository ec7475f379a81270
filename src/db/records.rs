use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::employee::models::Employee;
use crate::generators::GeneratorError;
use crate::invoice::models::Invoice;
use crate::report::models::Report;

/// Everything the record store holds, as persisted to the data file.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub reports: Vec<Report>,
}

impl Snapshot {
    pub fn load(path: &Path) -> io::Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }
}

/// Employee, invoice and report records. Lists are returned newest first.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_employee(&self, id: Uuid) -> Result<Employee, GeneratorError>;
    async fn list_employees(&self) -> Result<Vec<Employee>, GeneratorError>;
    async fn create_employee(&self, employee: Employee) -> Result<Employee, GeneratorError>;

    async fn get_invoice(&self, id: Uuid) -> Result<Invoice, GeneratorError>;
    async fn list_invoices(&self) -> Result<Vec<Invoice>, GeneratorError>;
    async fn create_invoice(&self, invoice: Invoice) -> Result<Invoice, GeneratorError>;
    async fn set_invoice_pdf_path(&self, id: Uuid, path: String)
        -> Result<Invoice, GeneratorError>;

    async fn create_report(&self, report: Report) -> Result<Report, GeneratorError>;
    async fn get_report(&self, id: Uuid) -> Result<Report, GeneratorError>;
    async fn list_reports(&self) -> Result<Vec<Report>, GeneratorError>;
    async fn delete_report(&self, id: Uuid) -> Result<Report, GeneratorError>;
    async fn reports_for_template(&self, template_id: Uuid) -> Result<Vec<Report>, GeneratorError>;
}

/// Records held in memory, with every change forwarded to the persistence worker.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: RwLock<Snapshot>,
    persist_sender: Option<mpsc::UnboundedSender<Snapshot>>,
}

impl InMemoryRecordStore {
    /// A store without persistence.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            persist_sender: None,
        }
    }

    /// Load `data_file` if it exists and spawn the worker that keeps it up to date.
    pub fn open(data_file: PathBuf) -> io::Result<Self> {
        let snapshot = Snapshot::load(&data_file)?;
        log::info!(
            "Loaded {} employees, {} invoices, {} reports from {}",
            snapshot.employees.len(),
            snapshot.invoices.len(),
            snapshot.reports.len(),
            data_file.display()
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(super::persistence::start_persistence_worker(
            receiver, data_file,
        ));

        Ok(Self {
            state: RwLock::new(snapshot),
            persist_sender: Some(sender),
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.read().clone()
    }

    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Snapshot) -> Result<T, GeneratorError>,
    ) -> Result<T, GeneratorError> {
        let (result, snapshot) = {
            let mut state = self.state.write();
            let result = change(&mut *state)?;
            let snapshot = self.persist_sender.as_ref().map(|_| state.clone());
            (result, snapshot)
        };

        if let (Some(sender), Some(snapshot)) = (&self.persist_sender, snapshot) {
            if let Err(e) = sender.send(snapshot) {
                log::error!("Failed to queue records for persistence: {}", e);
            } else {
                log::debug!("Records queued for background persistence");
            }
        }
        Ok(result)
    }

    fn read<T>(&self, view: impl FnOnce(&Snapshot) -> T) -> T {
        view(&*self.state.read())
    }
}

fn newest_first<T: Clone>(items: &[T]) -> Vec<T> {
    items.iter().rev().cloned().collect()
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_employee(&self, id: Uuid) -> Result<Employee, GeneratorError> {
        self.read(|s| s.employees.iter().find(|e| e.id == id).cloned())
            .ok_or_else(|| GeneratorError::not_found("employee", id))
    }

    async fn list_employees(&self) -> Result<Vec<Employee>, GeneratorError> {
        Ok(self.read(|s| newest_first(&s.employees)))
    }

    async fn create_employee(&self, employee: Employee) -> Result<Employee, GeneratorError> {
        self.mutate(|s| {
            if s.employees.iter().any(|e| e.nik == employee.nik) {
                return Err(GeneratorError::InvalidRequest(format!(
                    "employee with NIK {} already exists",
                    employee.nik
                )));
            }
            s.employees.push(employee.clone());
            Ok(employee)
        })
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Invoice, GeneratorError> {
        self.read(|s| s.invoices.iter().find(|i| i.id == id).cloned())
            .ok_or_else(|| GeneratorError::not_found("invoice", id))
    }

    async fn list_invoices(&self) -> Result<Vec<Invoice>, GeneratorError> {
        Ok(self.read(|s| newest_first(&s.invoices)))
    }

    async fn create_invoice(&self, invoice: Invoice) -> Result<Invoice, GeneratorError> {
        self.mutate(|s| {
            if !s.employees.iter().any(|e| e.id == invoice.employee_id) {
                return Err(GeneratorError::not_found("employee", invoice.employee_id));
            }
            if s
                .invoices
                .iter()
                .any(|i| i.invoice_number == invoice.invoice_number)
            {
                return Err(GeneratorError::InvalidRequest(format!(
                    "invoice number {} already exists",
                    invoice.invoice_number
                )));
            }
            s.invoices.push(invoice.clone());
            Ok(invoice)
        })
    }

    async fn set_invoice_pdf_path(
        &self,
        id: Uuid,
        path: String,
    ) -> Result<Invoice, GeneratorError> {
        self.mutate(|s| {
            let invoice = s
                .invoices
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| GeneratorError::not_found("invoice", id))?;
            invoice.pdf_path = Some(path);
            Ok(invoice.clone())
        })
    }

    async fn create_report(&self, report: Report) -> Result<Report, GeneratorError> {
        self.mutate(|s| {
            s.reports.push(report.clone());
            Ok(report)
        })
    }

    async fn get_report(&self, id: Uuid) -> Result<Report, GeneratorError> {
        self.read(|s| s.reports.iter().find(|r| r.id == id).cloned())
            .ok_or_else(|| GeneratorError::not_found("report", id))
    }

    async fn list_reports(&self) -> Result<Vec<Report>, GeneratorError> {
        Ok(self.read(|s| newest_first(&s.reports)))
    }

    async fn delete_report(&self, id: Uuid) -> Result<Report, GeneratorError> {
        self.mutate(|s| {
            let position = s
                .reports
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| GeneratorError::not_found("report", id))?;
            Ok(s.reports.remove(position))
        })
    }

    async fn reports_for_template(&self, template_id: Uuid) -> Result<Vec<Report>, GeneratorError> {
        Ok(self.read(|s| {
            s.reports
                .iter()
                .filter(|r| r.template_id == template_id)
                .cloned()
                .collect()
        }))
    }
}
