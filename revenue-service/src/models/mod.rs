pub mod customer;
pub mod invoice;
pub mod payment;
pub mod property;

pub use customer::{Customer, CustomerKind, CustomerRef, TaxpayerData};
pub use invoice::{CreateInvoice, Invoice, InvoiceStatus, ListInvoicesFilter, UpdateInvoice};
pub use payment::{CreatePayment, Payment, PaymentStatus};
pub use property::Property;
