//! DocumentAssembler: builds the canonical DTE XML for a draft invoice.
//!
//! Pure and deterministic: the output is a function of the invoice and its
//! line items alone. Validation failures here mean the invoice itself is bad;
//! they are never retried.

use thiserror::Error;

use entrada_core::money;

use crate::invoice::Invoice;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("missing buyer field: {0}")]
    MissingBuyerField(&'static str),

    #[error("invoice has no line items")]
    NoLines,

    #[error("invalid line {line_no}: {reason}")]
    InvalidLine { line_no: u32, reason: String },

    #[error("{field} does not reconcile: expected {expected_cents} centavos, found {actual_cents}")]
    TotalsMismatch {
        field: &'static str,
        expected_cents: i64,
        actual_cents: i64,
    },
}

/// Build the certifiable XML payload.
///
/// Fails if required buyer fields are missing or the monetary totals do not
/// reconcile within ±0.01 currency units.
pub fn assemble(invoice: &Invoice) -> Result<String, AssemblyError> {
    validate(invoice)?;

    let mut xml = String::with_capacity(1024);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(
        r#"<dte:GTDocumento xmlns:dte="http://www.sat.gob.gt/dte/fel/0.2.0" Version="0.1">"#,
    );
    xml.push_str(r#"<dte:SAT ClaseDocumento="dte">"#);
    xml.push_str(&format!(r#"<dte:DTE ID="{}">"#, invoice.id));
    xml.push_str(r#"<dte:DatosEmision ID="DatosEmision">"#);

    xml.push_str(&format!(
        r#"<dte:DatosGenerales Tipo="{}" FechaHoraEmision="{}" CodigoMoneda="{}"/>"#,
        invoice.document_type.code(),
        invoice.created_at.to_rfc3339(),
        escape(&invoice.currency),
    ));
    xml.push_str(&format!(
        r#"<dte:Receptor IDReceptor="{}" NombreReceptor="{}" DireccionReceptor="{}"/>"#,
        escape(invoice.buyer.nit.trim()),
        escape(invoice.buyer.name.trim()),
        escape(invoice.buyer.address.trim()),
    ));

    xml.push_str("<dte:Items>");
    for line in &invoice.lines {
        xml.push_str(&format!(
            r#"<dte:Item NumeroLinea="{}" BienOServicio="S">"#,
            line.line_no
        ));
        xml.push_str(&format!("<dte:Cantidad>{}</dte:Cantidad>", line.quantity));
        xml.push_str(&format!(
            "<dte:Descripcion>{}</dte:Descripcion>",
            escape(&line.description)
        ));
        xml.push_str(&format!(
            "<dte:PrecioUnitario>{}</dte:PrecioUnitario>",
            money::format_cents(line.unit_price_cents)
        ));
        xml.push_str(&format!(
            "<dte:Total>{}</dte:Total>",
            money::format_cents(line.total_cents())
        ));
        xml.push_str("</dte:Item>");
    }
    xml.push_str("</dte:Items>");

    xml.push_str("<dte:Totales>");
    xml.push_str(&format!(
        r#"<dte:TotalImpuestos><dte:TotalImpuesto NombreCorto="IVA" TotalMontoImpuesto="{}"/></dte:TotalImpuestos>"#,
        money::format_cents(invoice.tax_cents)
    ));
    xml.push_str(&format!(
        "<dte:GranTotal>{}</dte:GranTotal>",
        money::format_cents(invoice.total_cents)
    ));
    xml.push_str("</dte:Totales>");

    xml.push_str("</dte:DatosEmision></dte:DTE></dte:SAT></dte:GTDocumento>");
    Ok(xml)
}

fn validate(invoice: &Invoice) -> Result<(), AssemblyError> {
    if invoice.buyer.nit.trim().is_empty() {
        return Err(AssemblyError::MissingBuyerField("nit"));
    }
    if invoice.buyer.name.trim().is_empty() {
        return Err(AssemblyError::MissingBuyerField("name"));
    }
    if invoice.buyer.address.trim().is_empty() {
        return Err(AssemblyError::MissingBuyerField("address"));
    }

    if invoice.lines.is_empty() {
        return Err(AssemblyError::NoLines);
    }
    let mut lines_total: i64 = 0;
    for line in &invoice.lines {
        if line.quantity <= 0 {
            return Err(AssemblyError::InvalidLine {
                line_no: line.line_no,
                reason: "quantity must be positive".to_string(),
            });
        }
        if line.unit_price_cents < 0 {
            return Err(AssemblyError::InvalidLine {
                line_no: line.line_no,
                reason: "unit price must not be negative".to_string(),
            });
        }
        lines_total += line.total_cents();
    }

    if (lines_total - invoice.subtotal_cents).abs() > money::RECONCILE_TOLERANCE_CENTS {
        return Err(AssemblyError::TotalsMismatch {
            field: "subtotal",
            expected_cents: lines_total,
            actual_cents: invoice.subtotal_cents,
        });
    }

    let expected_tax = money::tax_for(invoice.subtotal_cents, invoice.tax_rate_bps);
    if (expected_tax - invoice.tax_cents).abs() > money::RECONCILE_TOLERANCE_CENTS {
        return Err(AssemblyError::TotalsMismatch {
            field: "tax",
            expected_cents: expected_tax,
            actual_cents: invoice.tax_cents,
        });
    }

    if !money::totals_reconcile(invoice.subtotal_cents, invoice.tax_cents, invoice.total_cents) {
        return Err(AssemblyError::TotalsMismatch {
            field: "total",
            expected_cents: invoice.subtotal_cents + invoice.tax_cents,
            actual_cents: invoice.total_cents,
        });
    }

    Ok(())
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{BuyerInfo, DocumentType, InvoiceLine};
    use chrono::{DateTime, TimeZone, Utc};
    use entrada_core::{InvoiceId, RegistrationId};
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn invoice(subtotal: i64, tax: i64, total: i64) -> Invoice {
        let mut inv = Invoice::draft(
            InvoiceId::new(),
            RegistrationId::new(),
            DocumentType::Factura,
            BuyerInfo {
                nit: "1234567-8".to_string(),
                name: "Comercial Quetzal, S.A.".to_string(),
                address: "4a Avenida 12-34 zona 1".to_string(),
            },
            subtotal,
            1_200,
            total,
            "GTQ",
            vec![InvoiceLine {
                line_no: 1,
                description: "Entrada general".to_string(),
                quantity: 1,
                unit_price_cents: subtotal,
            }],
            test_time(),
        );
        // Override the derived tax so tests can inject mismatches.
        inv.tax_cents = tax;
        inv
    }

    #[test]
    fn assembles_reconciled_invoice() {
        // 87.59 subtotal at 12% → 10.51 tax, 98.10 total.
        let xml = assemble(&invoice(8_759, 1_051, 9_810)).unwrap();
        assert!(xml.contains(r#"Tipo="FACT""#));
        assert!(xml.contains("<dte:GranTotal>98.10</dte:GranTotal>"));
        assert!(xml.contains(r#"TotalMontoImpuesto="10.51""#));
    }

    #[test]
    fn rejects_total_off_by_more_than_tolerance() {
        let err = assemble(&invoice(8_759, 1_051, 9_812)).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::TotalsMismatch { field: "total", .. }
        ));

        // One centavo off is within rounding tolerance.
        assert!(assemble(&invoice(8_759, 1_051, 9_811)).is_ok());
    }

    #[test]
    fn rejects_missing_buyer_fields() {
        let mut inv = invoice(8_759, 1_051, 9_810);
        inv.buyer.nit = "  ".to_string();
        assert_eq!(
            assemble(&inv).unwrap_err(),
            AssemblyError::MissingBuyerField("nit")
        );

        let mut inv = invoice(8_759, 1_051, 9_810);
        inv.buyer.address.clear();
        assert_eq!(
            assemble(&inv).unwrap_err(),
            AssemblyError::MissingBuyerField("address")
        );
    }

    #[test]
    fn rejects_empty_and_invalid_lines() {
        let mut inv = invoice(8_759, 1_051, 9_810);
        inv.lines.clear();
        assert_eq!(assemble(&inv).unwrap_err(), AssemblyError::NoLines);

        let mut inv = invoice(8_759, 1_051, 9_810);
        inv.lines[0].quantity = 0;
        assert!(matches!(
            assemble(&inv).unwrap_err(),
            AssemblyError::InvalidLine { line_no: 1, .. }
        ));
    }

    #[test]
    fn escapes_buyer_markup() {
        let mut inv = invoice(8_759, 1_051, 9_810);
        inv.buyer.name = r#"Tienda "El <Ahorro> & Más""#.to_string();
        let xml = assemble(&inv).unwrap();
        assert!(xml.contains("Tienda &quot;El &lt;Ahorro&gt; &amp; M"));
        assert!(!xml.contains("<Ahorro>"));
    }

    #[test]
    fn output_is_deterministic() {
        let inv = invoice(8_759, 1_051, 9_810);
        assert_eq!(assemble(&inv).unwrap(), assemble(&inv).unwrap());
    }

    proptest! {
        /// Any invoice whose tax derives from its rate and whose total is the
        /// exact sum always assembles.
        #[test]
        fn derived_totals_always_assemble(subtotal in 1i64..10_000_000, rate_bps in 0u32..2_500) {
            let tax = entrada_core::money::tax_for(subtotal, rate_bps);
            let mut inv = invoice(subtotal, tax, subtotal + tax);
            inv.tax_rate_bps = rate_bps;
            inv.lines[0].unit_price_cents = subtotal;
            prop_assert!(assemble(&inv).is_ok());
        }
    }
}
