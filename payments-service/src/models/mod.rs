pub mod detail;
pub mod payment;
pub mod qr_charge;
pub mod work_order;

pub use detail::{NewDetail, PaymentDetail, PaymentMethod};
pub use payment::{InstallmentLine, NewPayment, Payment, PaymentKind, PaymentState, PaymentTerms};
pub use qr_charge::{ChargeStatus, NewQrCharge, QrCharge};
pub use work_order::{NewStaffUser, NewWorkOrder, StaffRole, StaffUser, WorkOrder, WorkOrderState};
